//! Element mapper.
//!
//! Leaf entries carry integer identifiers instead of caller elements, so
//! node records keep a fixed size whatever the element looks like. The
//! mapper is a separate paged file of fixed-length records; the record for
//! identifier `id` sits at `(id - 1) * record_size` and remembers the
//! element together with the envelope it is currently indexed under.

use std::marker::PhantomData;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::codec::{decode_frame, encode_frame};
use super::paged_file::PagedFile;
use super::rtree_types::{ElementId, Rect, SpatialError, SpatialResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordState {
    Live,
    /// The caller gave the mapping up; the identifier is never handed out again
    Released,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct MapperRecord<T, R> {
    id: ElementId,
    state: RecordState,
    /// Envelope the element is indexed under, `None` while detached from the tree
    rect: Option<R>,
    element: T,
}

/// Length of the smallest frame that records an indexed element of `dimensions`
/// coordinates, with an element that serializes to nothing
pub fn min_record_size(dimensions: usize) -> SpatialResult<usize> {
    let rect = Rect::new(vec![0.0; dimensions], vec![0.0; dimensions]);
    let frame = encode_frame(&MapperRecord {
        id: ElementId::MAX,
        state: RecordState::Live,
        rect: Some(&rect),
        element: &(),
    })?;
    Ok(frame.len())
}

pub struct ElementMapper<E> {
    file: PagedFile,
    _element: PhantomData<fn() -> E>,
}

impl<E> ElementMapper<E> {
    /// Number of records ever assigned, released ones included
    pub fn len(&self) -> u64 {
        self.file.record_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Identifier the next `assign` returns
    pub fn next_id(&self) -> ElementId {
        self.len() + 1
    }

    pub fn flush(&mut self) -> SpatialResult<()> {
        self.file.flush()
    }

    pub fn sync(&mut self) -> SpatialResult<()> {
        self.file.sync()
    }
}

impl<E> ElementMapper<E>
where
    E: Serialize + DeserializeOwned + PartialEq,
{
    pub fn create(path: &Path, record_size: usize, window_length: usize) -> SpatialResult<Self> {
        Ok(Self {
            file: PagedFile::create(path, 0, record_size, window_length)?,
            _element: PhantomData,
        })
    }

    pub fn open(path: &Path, record_size: usize, window_length: usize) -> SpatialResult<Self> {
        let file = PagedFile::open(path, 0, record_size, window_length)?;
        if file.data_len() % record_size as u64 != 0 {
            return Err(SpatialError::CorruptStore(format!(
                "element file {} holds {} bytes, not a whole number of {} byte records",
                path.display(),
                file.data_len(),
                record_size
            )));
        }
        Ok(Self {
            file,
            _element: PhantomData,
        })
    }

    /// Identifier of the first live element matching `pred`
    pub fn identifier_for<P>(&mut self, pred: P) -> SpatialResult<ElementId>
    where
        P: Fn(&E) -> bool,
    {
        self.find(pred)?
            .map(|(id, _)| id)
            .ok_or_else(|| SpatialError::NotFound("no element matches the predicate".into()))
    }

    /// Identifier and indexed envelope of the first live element matching `pred`
    pub fn find<P>(&mut self, pred: P) -> SpatialResult<Option<(ElementId, Option<Rect>)>>
    where
        P: Fn(&E) -> bool,
    {
        for id in 1..=self.len() {
            let record = self.read(id)?;
            if record.state == RecordState::Live && pred(&record.element) {
                return Ok(Some((id, record.rect)));
            }
        }
        Ok(None)
    }

    /// Append a record for `element` and return its identifier
    pub fn assign(&mut self, element: &E, rect: Option<&Rect>) -> SpatialResult<ElementId> {
        let id = self.next_id();
        self.write(id, RecordState::Live, rect, element)?;
        Ok(id)
    }

    pub fn element_for(&mut self, id: ElementId) -> SpatialResult<E> {
        let record = self.read_live(id)?;
        Ok(record.element)
    }

    pub fn indexed_rect(&mut self, id: ElementId) -> SpatialResult<Option<Rect>> {
        Ok(self.read_live(id)?.rect)
    }

    /// Record the envelope `id` is indexed under, or `None` once it leaves the tree
    pub fn set_indexed_rect(&mut self, id: ElementId, rect: Option<&Rect>) -> SpatialResult<()> {
        let record = self.read_live(id)?;
        self.write(id, RecordState::Live, rect, &record.element)
    }

    /// Give up the mapping of `id`. Later lookups report it as not found.
    pub fn release(&mut self, id: ElementId) -> SpatialResult<()> {
        let record = self.read_live(id)?;
        self.write(id, RecordState::Released, None, &record.element)
    }

    /// Drop every record
    pub fn clear(&mut self) -> SpatialResult<()> {
        self.file.truncate()
    }

    fn offset(&self, id: ElementId) -> SpatialResult<u64> {
        if id == 0 || id > self.len() {
            return Err(SpatialError::NotFound(format!("element id {}", id)));
        }
        Ok((id - 1) * self.file.record_len() as u64)
    }

    fn read(&mut self, id: ElementId) -> SpatialResult<MapperRecord<E, Rect>> {
        let offset = self.offset(id)?;
        let record: MapperRecord<E, Rect> = decode_frame(self.file.read_record(offset)?)?;
        if record.id != id {
            return Err(SpatialError::CorruptStore(format!(
                "element record at offset {} carries id {}, expected {}",
                offset, record.id, id
            )));
        }
        Ok(record)
    }

    fn read_live(&mut self, id: ElementId) -> SpatialResult<MapperRecord<E, Rect>> {
        let record = self.read(id)?;
        if record.state == RecordState::Released {
            return Err(SpatialError::NotFound(format!("element id {} was released", id)));
        }
        Ok(record)
    }

    fn write(
        &mut self,
        id: ElementId,
        state: RecordState,
        rect: Option<&Rect>,
        element: &E,
    ) -> SpatialResult<()> {
        let frame = encode_frame(&MapperRecord {
            id,
            state,
            rect,
            element,
        })?;
        if frame.len() > self.file.record_len() {
            return Err(SpatialError::Usage(format!(
                "element record of {} bytes exceeds the mapper record size of {} bytes",
                frame.len(),
                self.file.record_len()
            )));
        }
        self.file
            .write_record((id - 1) * self.file.record_len() as u64, &frame)
    }
}
