//! Paged node store.
//!
//! The node file starts with a fixed header region followed by equally
//! sized node slots. Every slot holds one checksummed frame, either a node
//! or a link in the chain of freed slots. All slot access goes through a
//! [`PagedFile`] window; the header is read and written directly.

use std::path::Path;

use super::codec::{decode_frame, encode_frame};
use super::paged_file::PagedFile;
use super::rtree_config::RTreeConfig;
use super::rtree_constants::{HEADER_SIZE, MAGIC, VERSION};
use super::rtree_types::{
    Entry, FileHeader, Node, NodeOffset, NodeRecord, Rect, SpatialError, SpatialResult,
};

pub struct NodeStore {
    file: PagedFile,
    header: FileHeader,
}

impl NodeStore {
    /// Create a new node file holding an empty root leaf
    pub fn create(path: &Path, config: &RTreeConfig) -> SpatialResult<Self> {
        config.validate()?;
        let node_record_size = node_record_size(config.max_entries(), config.dimensions())?;

        let header = FileHeader {
            magic: MAGIC,
            version: VERSION,
            max_entries: config.max_entries() as u32,
            min_entries: config.min_entries() as u32,
            dimensions: config.dimensions() as u32,
            split_policy: config.split_policy(),
            reference_system: config.reference_system().map(str::to_string),
            node_record_size: node_record_size as u32,
            mapper_record_size: config.mapper_record_size() as u32,
            root_offset: HEADER_SIZE,
            height: 1,
            element_count: 0,
            next_node_id: 2,
            free_list_head: 0,
            free_node_count: 0,
        };

        let file = PagedFile::create(path, HEADER_SIZE, node_record_size, config.window_length())?;
        let mut store = Self { file, header };
        store.write_node(HEADER_SIZE, &Node::leaf(Vec::new()))?;
        store.file.flush()?;
        store.write_header()?;
        Ok(store)
    }

    /// Open an existing node file. Structural parameters come from its header.
    pub fn open(path: &Path, config: &RTreeConfig) -> SpatialResult<Self> {
        let mut header_file = PagedFile::open(path, HEADER_SIZE, 1, 1)?;
        let bytes = header_file.read_prefix(HEADER_SIZE as usize)?;
        drop(header_file);

        let header: FileHeader = decode_frame(&bytes)?;
        header.validate()?;

        let file = PagedFile::open(
            path,
            HEADER_SIZE,
            header.node_record_size as usize,
            config.window_length(),
        )?;
        if file.data_len() % header.node_record_size as u64 != 0 {
            return Err(SpatialError::CorruptStore(format!(
                "node region of {} bytes is not a whole number of {} byte slots",
                file.data_len(),
                header.node_record_size
            )));
        }

        Ok(Self { file, header })
    }

    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    /// Replace the in-memory header. Nothing is written until `write_header`.
    pub fn set_header(&mut self, header: FileHeader) {
        self.header = header;
    }

    pub fn write_header(&mut self) -> SpatialResult<()> {
        let frame = encode_frame(&self.header)?;
        if frame.len() > HEADER_SIZE as usize {
            return Err(SpatialError::Invariant(format!(
                "header of {} bytes exceeds the {} byte header region",
                frame.len(),
                HEADER_SIZE
            )));
        }
        let mut padded = frame;
        padded.resize(HEADER_SIZE as usize, 0);
        self.file.write_prefix(&padded)
    }

    pub fn node_record_size(&self) -> usize {
        self.file.record_len()
    }

    pub fn read_record(&mut self, offset: NodeOffset) -> SpatialResult<NodeRecord> {
        let slot = self.file.read_record(offset)?;
        decode_frame(slot).map_err(|e| match e {
            SpatialError::CorruptStore(msg) => {
                SpatialError::CorruptStore(format!("node at offset {}: {}", offset, msg))
            }
            other => other,
        })
    }

    /// Read a slot that must hold a live, well formed node
    pub fn read_node(&mut self, offset: NodeOffset) -> SpatialResult<Node> {
        match self.read_record(offset)? {
            NodeRecord::Node(node) if node.is_well_formed() => Ok(node),
            NodeRecord::Node(node) => Err(SpatialError::CorruptStore(format!(
                "node at offset {} has kind {:?} at level {}",
                offset, node.kind, node.level
            ))),
            NodeRecord::Free { .. } => Err(SpatialError::CorruptStore(format!(
                "offset {} refers to a freed node",
                offset
            ))),
        }
    }

    pub fn write_record(&mut self, offset: NodeOffset, record: &NodeRecord) -> SpatialResult<()> {
        let frame = encode_frame(record)?;
        if frame.len() > self.file.record_len() {
            return Err(SpatialError::Invariant(format!(
                "node record of {} bytes does not fit slot of {} bytes",
                frame.len(),
                self.file.record_len()
            )));
        }
        self.file.write_record(offset, &frame)
    }

    pub fn write_node(&mut self, offset: NodeOffset, node: &Node) -> SpatialResult<()> {
        self.write_record(offset, &NodeRecord::Node(node.clone()))
    }

    /// Write pending slot bytes back, then the header
    pub fn flush(&mut self) -> SpatialResult<()> {
        self.file.flush()?;
        self.write_header()
    }

    pub fn sync(&mut self) -> SpatialResult<()> {
        self.flush()?;
        self.file.sync()
    }

    /// Drop every node and start over with an empty root leaf. Structural
    /// parameters are kept.
    pub fn reset(&mut self) -> SpatialResult<()> {
        self.file.truncate()?;
        self.header.root_offset = HEADER_SIZE;
        self.header.height = 1;
        self.header.element_count = 0;
        self.header.next_node_id = 2;
        self.header.free_list_head = 0;
        self.header.free_node_count = 0;
        self.write_node(HEADER_SIZE, &Node::leaf(Vec::new()))?;
        self.flush()
    }

    /// Window loads and write-backs since open
    pub fn io_counts(&self) -> (u64, u64) {
        self.file.io_counts()
    }
}

/// Slot length able to hold a full node. An overflowing node only exists in
/// memory until it is split.
pub fn node_record_size(max_entries: usize, dimensions: usize) -> SpatialResult<usize> {
    let entry = Entry {
        rect: Rect::new(vec![0.0; dimensions], vec![0.0; dimensions]),
        pointer: u64::MAX,
    };
    let full = NodeRecord::Node(Node::directory(u32::MAX, vec![entry; max_entries]));
    Ok(encode_frame(&full)?.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn small_config() -> RTreeConfig {
        RTreeConfig::builder()
            .max_entries(4)
            .window_length(256)
            .build()
            .unwrap()
    }

    fn entry(x: f64, pointer: u64) -> Entry {
        Entry {
            rect: Rect::new(vec![x, x], vec![x + 1.0, x + 1.0]),
            pointer,
        }
    }

    #[test]
    fn test_store_create_writes_root_leaf() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.rtree");
        let mut store = NodeStore::create(&path, &small_config()).unwrap();

        assert_eq!(store.header().root_offset, HEADER_SIZE);
        assert_eq!(store.header().height, 1);
        assert_eq!(store.header().live_nodes(), 1);
        let root = store.read_node(HEADER_SIZE).unwrap();
        assert!(root.is_leaf());
        assert!(root.is_empty());

        let len = std::fs::metadata(&path).unwrap().len();
        assert_eq!(len, HEADER_SIZE + store.node_record_size() as u64);
    }

    #[test]
    fn test_store_reopen_reads_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.rtree");
        {
            let mut store = NodeStore::create(&path, &small_config()).unwrap();
            let mut header = store.header().clone();
            header.element_count = 42;
            store.set_header(header);
            store.sync().unwrap();
        }

        // tuning from the caller, structure from the file
        let store = NodeStore::open(&path, &RTreeConfig::default()).unwrap();
        assert_eq!(store.header().element_count, 42);
        assert_eq!(store.header().max_entries, 4);
        assert_eq!(store.header().min_entries, 2);
    }

    #[test]
    fn test_store_node_write_read() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.rtree");
        let mut store = NodeStore::create(&path, &small_config()).unwrap();
        let second = store.header().node_offset(2);

        let leaf = Node::leaf((0..4).map(|i| entry(i as f64, i + 1)).collect());
        store.write_node(second, &leaf).unwrap();
        assert_eq!(store.read_node(second).unwrap(), leaf);

        let dir_node = Node::directory(1, vec![entry(0.0, HEADER_SIZE), entry(5.0, second)]);
        store.write_node(HEADER_SIZE, &dir_node).unwrap();
        store.sync().unwrap();

        let mut reopened = NodeStore::open(&path, &small_config()).unwrap();
        assert_eq!(reopened.read_node(HEADER_SIZE).unwrap(), dir_node);
        assert_eq!(reopened.read_node(second).unwrap(), leaf);
    }

    #[test]
    fn test_store_free_record_is_not_a_node() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.rtree");
        let mut store = NodeStore::create(&path, &small_config()).unwrap();

        store
            .write_record(HEADER_SIZE, &NodeRecord::Free { next_free: 0 })
            .unwrap();
        assert_eq!(
            store.read_record(HEADER_SIZE).unwrap(),
            NodeRecord::Free { next_free: 0 }
        );
        assert!(store.read_node(HEADER_SIZE).unwrap_err().is_corrupt());
    }

    #[test]
    fn test_store_oversized_node_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.rtree");
        let mut store = NodeStore::create(&path, &small_config()).unwrap();

        let crowded = Node::leaf((0..6).map(|i| entry(i as f64, i)).collect());
        let result = store.write_node(HEADER_SIZE, &crowded);
        assert!(matches!(result, Err(SpatialError::Invariant(_))));
    }

    #[test]
    fn test_store_bad_magic_is_corruption() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.rtree");
        {
            let mut store = NodeStore::create(&path, &small_config()).unwrap();
            let mut header = store.header().clone();
            header.magic = 0xDEADBEEF;
            store.set_header(header);
            store.sync().unwrap();
        }
        let err = NodeStore::open(&path, &small_config()).err().unwrap();
        assert!(err.is_corrupt());
    }

    #[test]
    fn test_store_short_file_is_corruption() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.rtree");
        std::fs::write(&path, b"not a tree").unwrap();
        let err = NodeStore::open(&path, &small_config()).err().unwrap();
        assert!(err.is_corrupt());
    }

    #[test]
    fn test_store_reset() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.rtree");
        let mut store = NodeStore::create(&path, &small_config()).unwrap();
        let second = store.header().node_offset(2);
        store.write_node(second, &Node::leaf(vec![entry(1.0, 1)])).unwrap();
        let mut header = store.header().clone();
        header.next_node_id = 3;
        header.element_count = 1;
        store.set_header(header);

        store.reset().unwrap();
        assert_eq!(store.header().next_node_id, 2);
        assert_eq!(store.header().element_count, 0);
        assert!(store.read_node(HEADER_SIZE).unwrap().is_empty());
        assert!(store.read_record(second).unwrap_err().is_corrupt());
    }

    #[test]
    fn test_record_size_grows_with_dimensions() {
        let two = node_record_size(10, 2).unwrap();
        let three = node_record_size(10, 3).unwrap();
        assert!(three > two);
        assert!(node_record_size(11, 2).unwrap() > two);
    }
}
