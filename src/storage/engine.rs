use anyhow::Result;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::{BTreeMap, VecDeque};
use std::ops::Bound;
use std::sync::Arc;

/// A stored key with its value; `None` marks a raw engine-level tombstone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub key: Bytes,
    pub value: Option<Bytes>,
}

pub type EntryIter = Box<dyn Iterator<Item = Entry> + Send>;

/// The local persistent store.
///
/// Implementations must tolerate concurrent `get`, `upsert` and `range`
/// from any number of request workers.
pub trait StorageEngine: Send + Sync + 'static {
    fn get(&self, key: &[u8]) -> Result<Option<Entry>>;

    fn upsert(&self, entry: Entry) -> Result<()>;

    /// Entries with `start <= key < end` in ascending key order; `end = None`
    /// leaves the range open. The iterator is consumed lazily.
    fn range(&self, start: &[u8], end: Option<&[u8]>) -> Result<EntryIter>;
}

/// Number of entries copied out of the map per lock acquisition during scans.
const SCAN_PAGE: usize = 64;

/// Ordered in-memory engine.
///
/// Range iterators page through the map, re-acquiring the read lock for each
/// page, so a scan never holds the lock while the caller streams and never
/// materializes the whole range.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    data: Arc<RwLock<BTreeMap<Bytes, Option<Bytes>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }
}

impl StorageEngine for MemoryStore {
    fn get(&self, key: &[u8]) -> Result<Option<Entry>> {
        let data = self.data.read();
        Ok(data.get_key_value(key).map(|(key, value)| Entry {
            key: key.clone(),
            value: value.clone(),
        }))
    }

    fn upsert(&self, entry: Entry) -> Result<()> {
        self.data.write().insert(entry.key, entry.value);
        Ok(())
    }

    fn range(&self, start: &[u8], end: Option<&[u8]>) -> Result<EntryIter> {
        Ok(Box::new(PagedRange {
            data: self.data.clone(),
            lower: Bytes::copy_from_slice(start),
            lower_inclusive: true,
            end: end.map(Bytes::copy_from_slice),
            page: VecDeque::with_capacity(SCAN_PAGE),
            exhausted: false,
        }))
    }
}

struct PagedRange {
    data: Arc<RwLock<BTreeMap<Bytes, Option<Bytes>>>>,
    /// Next key to resume from; inclusive only before the first page.
    lower: Bytes,
    lower_inclusive: bool,
    end: Option<Bytes>,
    page: VecDeque<Entry>,
    exhausted: bool,
}

impl PagedRange {
    fn refill(&mut self) {
        if let Some(end) = &self.end
            && self.lower >= *end
        {
            self.exhausted = true;
            return;
        }

        let lower = if self.lower_inclusive {
            Bound::Included(self.lower.as_ref())
        } else {
            Bound::Excluded(self.lower.as_ref())
        };
        let upper = match &self.end {
            Some(end) => Bound::Excluded(end.as_ref()),
            None => Bound::Unbounded,
        };

        let data = self.data.read();
        for (key, value) in data.range::<[u8], _>((lower, upper)).take(SCAN_PAGE) {
            self.page.push_back(Entry {
                key: key.clone(),
                value: value.clone(),
            });
        }
        drop(data);

        match self.page.back() {
            Some(last) => {
                if self.page.len() < SCAN_PAGE {
                    self.exhausted = true;
                }
                self.lower = last.key.clone();
                self.lower_inclusive = false;
            }
            None => self.exhausted = true,
        }
    }
}

impl Iterator for PagedRange {
    type Item = Entry;

    fn next(&mut self) -> Option<Entry> {
        if self.page.is_empty() && !self.exhausted {
            self.refill();
        }
        self.page.pop_front()
    }
}
