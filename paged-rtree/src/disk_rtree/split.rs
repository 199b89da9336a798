//! Node split policies.
//!
//! The policy is chosen once when a tree is created and recorded in the
//! file header. Each policy picks two seed entries and then distributes the
//! remaining ones between the two groups, never letting a group end up
//! below the minimum fill.

use serde::{Deserialize, Serialize};

use super::rtree_types::{Entry, Rect, SpatialError, SpatialResult};

/// Algorithm used to partition an overflowing node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SplitPolicy {
    /// Quadratic-cost seed selection with greedy distribution
    #[default]
    Quadratic,
    /// Linear-cost seed selection, entries assigned in order
    Linear,
}

impl SplitPolicy {
    pub fn strategy(&self) -> &'static dyn SplitStrategy {
        match self {
            SplitPolicy::Quadratic => &QuadraticSplit,
            SplitPolicy::Linear => &LinearSplit,
        }
    }
}

impl std::fmt::Display for SplitPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SplitPolicy::Quadratic => write!(f, "quadratic"),
            SplitPolicy::Linear => write!(f, "linear"),
        }
    }
}

/// Partitions the entries of an overflowing node into two groups
pub trait SplitStrategy: Send + Sync {
    fn split(
        &self,
        entries: Vec<Entry>,
        min_entries: usize,
    ) -> SpatialResult<(Vec<Entry>, Vec<Entry>)>;
}

pub struct QuadraticSplit;

pub struct LinearSplit;

impl SplitStrategy for QuadraticSplit {
    fn split(
        &self,
        entries: Vec<Entry>,
        min_entries: usize,
    ) -> SpatialResult<(Vec<Entry>, Vec<Entry>)> {
        check_splittable(&entries, min_entries)?;

        // seeds: the pair wasting the most area when grouped together
        let mut seeds = (0, 1);
        let mut worst = f64::NEG_INFINITY;
        for i in 0..entries.len() {
            for j in i + 1..entries.len() {
                let (a, b) = (&entries[i].rect, &entries[j].rect);
                let waste = a.merge(b).area() - a.area() - b.area();
                if waste > worst {
                    worst = waste;
                    seeds = (i, j);
                }
            }
        }

        distribute(entries, seeds, min_entries, true)
    }
}

impl SplitStrategy for LinearSplit {
    fn split(
        &self,
        entries: Vec<Entry>,
        min_entries: usize,
    ) -> SpatialResult<(Vec<Entry>, Vec<Entry>)> {
        check_splittable(&entries, min_entries)?;

        let dimensions = entries[0].rect.dimensions();
        let mut seeds = (0, 1);
        let mut best_separation = f64::NEG_INFINITY;

        for d in 0..dimensions {
            // entry with the highest low side and entry with the lowest high side
            let mut highest_low = 0;
            let mut lowest_high = 0;
            let mut lowest = f64::INFINITY;
            let mut highest = f64::NEG_INFINITY;
            for (i, e) in entries.iter().enumerate() {
                if e.rect.min[d] > entries[highest_low].rect.min[d] {
                    highest_low = i;
                }
                if e.rect.max[d] < entries[lowest_high].rect.max[d] {
                    lowest_high = i;
                }
                lowest = lowest.min(e.rect.min[d]);
                highest = highest.max(e.rect.max[d]);
            }

            if highest_low == lowest_high {
                lowest_high = second_lowest_high(&entries, d, highest_low);
            }

            let width = highest - lowest;
            let separation = entries[highest_low].rect.min[d] - entries[lowest_high].rect.max[d];
            let normalized = if width > 0.0 { separation / width } else { 0.0 };
            if normalized > best_separation {
                best_separation = normalized;
                seeds = (lowest_high.min(highest_low), lowest_high.max(highest_low));
            }
        }

        distribute(entries, seeds, min_entries, false)
    }
}

fn second_lowest_high(entries: &[Entry], d: usize, skip: usize) -> usize {
    let mut chosen = if skip == 0 { 1 } else { 0 };
    for (i, e) in entries.iter().enumerate() {
        if i != skip && e.rect.max[d] < entries[chosen].rect.max[d] {
            chosen = i;
        }
    }
    chosen
}

fn check_splittable(entries: &[Entry], min_entries: usize) -> SpatialResult<()> {
    if min_entries == 0 || entries.len() < 2 * min_entries || entries.len() < 2 {
        return Err(SpatialError::Invariant(format!(
            "cannot split {} entries into two groups of at least {}",
            entries.len(),
            min_entries
        )));
    }
    Ok(())
}

struct Group {
    entries: Vec<Entry>,
    rect: Rect,
}

impl Group {
    fn seeded(seed: Entry) -> Self {
        Self {
            rect: seed.rect.clone(),
            entries: vec![seed],
        }
    }

    fn push(&mut self, entry: Entry) {
        self.rect.expand(&entry.rect);
        self.entries.push(entry);
    }
}

/// Assign the non-seed entries. With `pick_next`, the entry with the
/// strongest preference for one group goes first; otherwise entries are
/// taken in their current order.
fn distribute(
    entries: Vec<Entry>,
    seeds: (usize, usize),
    min_entries: usize,
    pick_next: bool,
) -> SpatialResult<(Vec<Entry>, Vec<Entry>)> {
    let mut remaining = entries;
    // remove the higher index first so the lower one stays valid
    let seed_b = remaining.remove(seeds.1);
    let seed_a = remaining.remove(seeds.0);
    let mut a = Group::seeded(seed_a);
    let mut b = Group::seeded(seed_b);

    while !remaining.is_empty() {
        if a.entries.len() + remaining.len() == min_entries {
            remaining.drain(..).for_each(|e| a.push(e));
            break;
        }
        if b.entries.len() + remaining.len() == min_entries {
            remaining.drain(..).for_each(|e| b.push(e));
            break;
        }

        let next = if pick_next {
            let mut chosen = 0;
            let mut strongest = f64::NEG_INFINITY;
            for (i, e) in remaining.iter().enumerate() {
                let preference =
                    (a.rect.enlargement(&e.rect) - b.rect.enlargement(&e.rect)).abs();
                if preference > strongest {
                    strongest = preference;
                    chosen = i;
                }
            }
            chosen
        } else {
            0
        };

        let entry = if pick_next {
            remaining.swap_remove(next)
        } else {
            remaining.remove(next)
        };
        if prefers_first(&a, &b, &entry.rect) {
            a.push(entry);
        } else {
            b.push(entry);
        }
    }

    if a.entries.len() < min_entries || b.entries.len() < min_entries {
        return Err(SpatialError::Invariant(format!(
            "split produced groups of {} and {} entries, minimum is {}",
            a.entries.len(),
            b.entries.len(),
            min_entries
        )));
    }
    Ok((a.entries, b.entries))
}

/// Least enlargement, then smaller area, then fewer entries
fn prefers_first(a: &Group, b: &Group, rect: &Rect) -> bool {
    let (ea, eb) = (a.rect.enlargement(rect), b.rect.enlargement(rect));
    if ea != eb {
        return ea < eb;
    }
    let (area_a, area_b) = (a.rect.area(), b.rect.area());
    if area_a != area_b {
        return area_a < area_b;
    }
    a.entries.len() <= b.entries.len()
}
