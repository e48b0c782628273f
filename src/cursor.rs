// The storage cursor interface consumed by the VM, plus an in-memory
// reference implementation used by tests and examples. The real B-tree/pager
// engine is an external collaborator specified by interface only; nothing
// here is a durable storage engine.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use crate::error::{Result, VdbeError};

/// Encodes a rowid as a big-endian 8-byte key, so the storage layer's
/// lexicographic key order matches numeric rowid order.
pub fn encode_rowid(rowid: u64) -> [u8; 8] {
    rowid.to_be_bytes()
}

pub fn decode_rowid(bytes: &[u8]) -> Option<u64> {
    let arr: [u8; 8] = bytes.try_into().ok()?;
    Some(u64::from_be_bytes(arr))
}

/// A stateful iterator over an ordered key-value B-tree, addressed by rowid:
/// `first/seek/next/prev/valid/rowid/value/close`, plus the write operations
/// the VDBE's cursor-owned `Insert`/`Delete` opcodes need. The cursor handle
/// already bundles the btree reference, so writes are expressed on the
/// cursor rather than threading a separate `BTree` handle through the
/// interpreter.
pub trait Cursor {
    fn first(&mut self) -> Result<bool>;
    fn seek(&mut self, rowid: u64) -> Result<bool>;
    fn next(&mut self) -> Result<bool>;
    fn prev(&mut self) -> Result<bool>;
    fn valid(&self) -> bool;
    fn rowid(&self) -> Option<u64>;
    fn value(&self) -> Option<Vec<u8>>;
    fn insert(&mut self, rowid: u64, value: Vec<u8>) -> Result<()>;
    /// Deletes the row at the cursor's current position.
    fn delete(&mut self) -> Result<()>;
    fn close(&mut self);
}

/// Opens a B-tree by root page id. Implemented by the storage layer; the VM
/// only ever calls `open` in response to `OpenRead`/`OpenWrite`.
pub trait Storage {
    fn open(&self, root_page: i32) -> Result<Box<dyn Cursor>>;
}

/// Reference in-memory B-tree keyed by rowid, ordered the same way the real
/// pager would order big-endian 8-byte keys. Not a storage engine: no
/// durability, no paging, no concurrency control beyond `RefCell`.
#[derive(Debug, Default)]
pub struct InMemoryTable {
    rows: RefCell<BTreeMap<u64, Vec<u8>>>,
}

impl InMemoryTable {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub fn seed(&self, rowid: u64, value: Vec<u8>) {
        self.rows.borrow_mut().insert(rowid, value);
    }

    pub fn get(&self, rowid: u64) -> Option<Vec<u8>> {
        self.rows.borrow().get(&rowid).cloned()
    }

    pub fn len(&self) -> usize {
        self.rows.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.borrow().is_empty()
    }
}

pub struct InMemoryCursor {
    table: Rc<InMemoryTable>,
    position: Option<u64>,
    closed: bool,
}

impl InMemoryCursor {
    pub fn new(table: Rc<InMemoryTable>) -> Self {
        Self {
            table,
            position: None,
            closed: false,
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(VdbeError::CursorClosed { cursor: -1 });
        }
        Ok(())
    }
}

impl Cursor for InMemoryCursor {
    fn first(&mut self) -> Result<bool> {
        self.ensure_open()?;
        self.position = self.table.rows.borrow().keys().next().copied();
        Ok(self.position.is_some())
    }

    fn seek(&mut self, rowid: u64) -> Result<bool> {
        self.ensure_open()?;
        let found = self.table.rows.borrow().contains_key(&rowid);
        self.position = if found { Some(rowid) } else { None };
        Ok(found)
    }

    fn next(&mut self) -> Result<bool> {
        self.ensure_open()?;
        let Some(cur) = self.position else {
            return Ok(false);
        };
        self.position = self
            .table
            .rows
            .borrow()
            .range((std::ops::Bound::Excluded(cur), std::ops::Bound::Unbounded))
            .next()
            .map(|(k, _)| *k);
        Ok(self.position.is_some())
    }

    fn prev(&mut self) -> Result<bool> {
        self.ensure_open()?;
        let Some(cur) = self.position else {
            return Ok(false);
        };
        self.position = self
            .table
            .rows
            .borrow()
            .range(..cur)
            .next_back()
            .map(|(k, _)| *k);
        Ok(self.position.is_some())
    }

    fn valid(&self) -> bool {
        !self.closed && self.position.is_some()
    }

    fn rowid(&self) -> Option<u64> {
        self.position
    }

    fn value(&self) -> Option<Vec<u8>> {
        self.position.and_then(|k| self.table.get(k))
    }

    fn insert(&mut self, rowid: u64, value: Vec<u8>) -> Result<()> {
        self.ensure_open()?;
        self.table.rows.borrow_mut().insert(rowid, value);
        self.position = Some(rowid);
        Ok(())
    }

    fn delete(&mut self) -> Result<()> {
        self.ensure_open()?;
        if let Some(rowid) = self.position {
            self.table.rows.borrow_mut().remove(&rowid);
        }
        Ok(())
    }

    fn close(&mut self) {
        self.closed = true;
        self.position = None;
    }
}

/// Reference storage: root pages are plain indices into a vector of tables,
/// standing in for the pager's root-page-to-btree mapping.
#[derive(Default)]
pub struct InMemoryStorage {
    tables: Vec<Rc<InMemoryTable>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self { tables: Vec::new() }
    }

    pub fn add_table(&mut self, table: Rc<InMemoryTable>) -> i32 {
        self.tables.push(table);
        (self.tables.len() - 1) as i32
    }

    pub fn table(&self, root_page: i32) -> Option<Rc<InMemoryTable>> {
        self.tables.get(root_page as usize).cloned()
    }
}

impl Storage for InMemoryStorage {
    fn open(&self, root_page: i32) -> Result<Box<dyn Cursor>> {
        let table = self
            .tables
            .get(root_page as usize)
            .cloned()
            .ok_or_else(|| VdbeError::UnknownTable(format!("root page {root_page}")))?;
        Ok(Box::new(InMemoryCursor::new(table)))
    }
}

/// An opaque nearest-neighbor index, consulted by the vector-search cursor.
/// The real HNSW/ANN implementation lives outside this crate; it need only
/// answer `search_knn`.
pub trait VectorIndex {
    /// Returns `(rowid, distance)` pairs for the `k` nearest neighbors of
    /// `query`, nearest first.
    fn search_knn(&self, query: &[f64], k: usize) -> Vec<(u64, f64)>;
}

/// Caches one `search_knn` batch and exposes `valid/current/next/reset`;
/// `reset` replays the cached batch without re-searching.
pub struct VectorSearchCursor {
    results: Vec<(u64, f64)>,
    index: usize,
}

impl VectorSearchCursor {
    pub fn open(index: &dyn VectorIndex, query: &[f64], k: usize) -> Self {
        Self {
            results: index.search_knn(query, k),
            index: 0,
        }
    }

    pub fn valid(&self) -> bool {
        self.index < self.results.len()
    }

    pub fn current(&self) -> Option<(u64, f64)> {
        self.results.get(self.index).copied()
    }

    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> bool {
        if self.index < self.results.len() {
            self.index += 1;
        }
        self.valid()
    }

    pub fn reset(&mut self) {
        self.index = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rowid_encoding_is_monotone_injection() {
        let mut prev: Option<(u64, [u8; 8])> = None;
        for rowid in [0u64, 1, 255, 256, 1_000_000, u32::MAX as u64, u64::MAX / 2] {
            let enc = encode_rowid(rowid);
            if let Some((prev_rowid, ref prev_enc)) = prev {
                if rowid > prev_rowid {
                    assert!(enc.as_slice() > prev_enc.as_slice());
                }
            }
            assert_eq!(decode_rowid(&enc), Some(rowid));
            prev = Some((rowid, enc));
        }
    }

    #[test]
    fn cursor_lifecycle_matches_state_machine() {
        let table = InMemoryTable::new();
        table.seed(1, vec![1]);
        table.seed(2, vec![2]);
        let mut cur = InMemoryCursor::new(table);
        assert!(cur.first().unwrap());
        assert!(cur.valid());
        assert_eq!(cur.rowid(), Some(1));
        assert!(cur.next().unwrap());
        assert_eq!(cur.rowid(), Some(2));
        assert!(!cur.next().unwrap());
        assert!(!cur.valid());
        cur.close();
        assert!(cur.first().is_err());
    }

    struct FixedIndex;
    impl VectorIndex for FixedIndex {
        fn search_knn(&self, _query: &[f64], k: usize) -> Vec<(u64, f64)> {
            (0..k as u64).map(|i| (i, i as f64)).collect()
        }
    }

    #[test]
    fn vector_search_cursor_resets_without_researching() {
        let idx = FixedIndex;
        let mut cur = VectorSearchCursor::open(&idx, &[1.0, 2.0], 3);
        assert!(cur.valid());
        cur.next();
        cur.next();
        assert!(!cur.next());
        cur.reset();
        assert_eq!(cur.current(), Some((0, 0.0)));
    }
}
