use crate::disk_rtree::rtree_types::{Rect, SpatialError, SpatialResult};

/// An n-dimensional axis-aligned bounding envelope.
///
/// `Envelope` is what callers index elements by and query with. It holds
/// the per-dimension minimum and maximum coordinates and an optional
/// reference-system tag. The tag is opaque metadata: coordinates are never
/// transformed.
///
/// # Examples
///
/// ```rust
/// use paged_rtree::Envelope;
///
/// let field = Envelope::new_2d(0.0, 0.0, 100.0, 50.0)
///     .with_reference_system("EPSG:4326");
/// let well = Envelope::point(vec![12.5, 7.0]).unwrap();
///
/// assert!(field.contains(&well));
/// assert_eq!(field.reference_system(), Some("EPSG:4326"));
/// ```
#[derive(Clone, PartialEq, Debug, serde::Deserialize, serde::Serialize)]
pub struct Envelope {
    min: Vec<f64>,
    max: Vec<f64>,
    reference_system: Option<String>,
}

impl std::fmt::Display for Envelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Envelope({:?} .. {:?}", self.min, self.max)?;
        if let Some(tag) = &self.reference_system {
            write!(f, " @ {}", tag)?;
        }
        write!(f, ")")
    }
}

impl Envelope {
    /// Creates an envelope from its corner coordinates.
    ///
    /// Fails with a usage error when the corners differ in length, have no
    /// dimensions, contain NaN or infinite coordinates, or when
    /// `min[i] > max[i]` for some `i`.
    pub fn new(min: Vec<f64>, max: Vec<f64>) -> SpatialResult<Envelope> {
        if min.len() != max.len() {
            return Err(SpatialError::Usage(format!(
                "envelope corners have {} and {} coordinates",
                min.len(),
                max.len()
            )));
        }
        if min.is_empty() {
            return Err(SpatialError::Usage("envelope needs at least one dimension".into()));
        }
        let envelope = Envelope {
            min,
            max,
            reference_system: None,
        };
        envelope.validate()?;
        Ok(envelope)
    }

    /// Check that every coordinate is finite and every interval ordered
    pub fn validate(&self) -> SpatialResult<()> {
        for (i, (lo, hi)) in self.min.iter().zip(&self.max).enumerate() {
            if !lo.is_finite() || !hi.is_finite() {
                return Err(SpatialError::Usage(format!(
                    "non-finite coordinate in dimension {} of {}",
                    i, self
                )));
            }
            if lo > hi {
                return Err(SpatialError::Usage(format!(
                    "min {} exceeds max {} in dimension {}",
                    lo, hi, i
                )));
            }
        }
        Ok(())
    }

    /// Two-dimensional envelope. Swapped corners are normalized.
    ///
    /// Coordinates are kept as given otherwise: an envelope with NaN or
    /// infinite coordinates is rejected by [`Envelope::validate`] and by
    /// every tree operation it is passed to.
    pub fn new_2d(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Envelope {
        let (x0, x1) = ordered(min_x, max_x);
        let (y0, y1) = ordered(min_y, max_y);
        Envelope {
            min: vec![x0, y0],
            max: vec![x1, y1],
            reference_system: None,
        }
    }

    /// Degenerate envelope around a single point
    pub fn point(coordinates: Vec<f64>) -> SpatialResult<Envelope> {
        Envelope::new(coordinates.clone(), coordinates)
    }

    /// Envelope covering the whole coordinate space
    pub fn world(dimensions: usize) -> Envelope {
        Envelope {
            min: vec![f64::MIN; dimensions],
            max: vec![f64::MAX; dimensions],
            reference_system: None,
        }
    }

    pub fn with_reference_system(mut self, tag: impl Into<String>) -> Envelope {
        self.reference_system = Some(tag.into());
        self
    }

    pub fn min(&self) -> &[f64] {
        &self.min
    }

    pub fn max(&self) -> &[f64] {
        &self.max
    }

    pub fn reference_system(&self) -> Option<&str> {
        self.reference_system.as_deref()
    }

    pub fn dimensions(&self) -> usize {
        self.min.len()
    }

    pub fn area(&self) -> f64 {
        self.min.iter().zip(&self.max).map(|(lo, hi)| hi - lo).product()
    }

    pub fn center(&self) -> Vec<f64> {
        self.min
            .iter()
            .zip(&self.max)
            .map(|(lo, hi)| (lo + hi) / 2.0)
            .collect()
    }

    /// Check if this envelope shares at least one point with another (edges
    /// included)
    pub fn intersects(&self, other: &Envelope) -> bool {
        self.to_rect().intersects(&other.to_rect())
    }

    /// Check if another envelope lies completely inside this one
    pub fn contains(&self, other: &Envelope) -> bool {
        self.to_rect().contains(&other.to_rect())
    }

    pub(crate) fn to_rect(&self) -> Rect {
        Rect::new(self.min.clone(), self.max.clone())
    }

    pub(crate) fn from_rect(rect: Rect, reference_system: Option<String>) -> Envelope {
        Envelope {
            min: rect.min,
            max: rect.max,
            reference_system,
        }
    }
}

/// Sort a pair without `f64::min`/`f64::max`, which would drop a NaN
fn ordered(a: f64, b: f64) -> (f64, f64) {
    if b < a {
        (b, a)
    } else {
        (a, b)
    }
}
