use std::collections::HashMap;
use std::sync::RwLock;

/// Bidirectional string dictionary for short-name compression.
///
/// Steps that occur in many inodes are replaced by a 16-bit id in the
/// compressed encoding. The dictionary hands out ids on first use and stops
/// growing once `capacity` entries exist; from then on `index` returns `None`
/// for unknown strings and the codec falls back to direct encoding.
pub struct Dict {
    inner: RwLock<DictInner>,
    capacity: usize,
}

struct DictInner {
    by_str: HashMap<String, u16>,
    by_id: Vec<String>,
}

impl Dict {
    /// A dictionary with the full 16-bit id space.
    pub fn new() -> Self {
        Self::with_capacity(u16::MAX as usize + 1)
    }

    /// A dictionary capped at `capacity` entries (at most 65536).
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: RwLock::new(DictInner {
                by_str: HashMap::new(),
                by_id: Vec::new(),
            }),
            capacity: capacity.min(u16::MAX as usize + 1),
        }
    }

    /// The id for `s`, allocating one if the dictionary still has room.
    pub fn index(&self, s: &str) -> Option<u16> {
        {
            let inner = self.inner.read().expect("lock poisoned");
            if let Some(&id) = inner.by_str.get(s) {
                return Some(id);
            }
            if inner.by_id.len() >= self.capacity {
                return None;
            }
        }
        let mut inner = self.inner.write().expect("lock poisoned");
        // Re-check: another writer may have inserted between the locks.
        if let Some(&id) = inner.by_str.get(s) {
            return Some(id);
        }
        if inner.by_id.len() >= self.capacity {
            return None;
        }
        let id = inner.by_id.len() as u16;
        inner.by_id.push(s.to_string());
        inner.by_str.insert(s.to_string(), id);
        Some(id)
    }

    /// The id for `s` without allocating.
    pub fn find(&self, s: &str) -> Option<u16> {
        self.inner.read().expect("lock poisoned").by_str.get(s).copied()
    }

    /// The string behind `id`.
    pub fn resolve(&self, id: u16) -> Option<String> {
        self.inner
            .read()
            .expect("lock poisoned")
            .by_id
            .get(id as usize)
            .cloned()
    }

    /// Number of allocated ids.
    pub fn len(&self) -> usize {
        self.inner.read().expect("lock poisoned").by_id.len()
    }

    /// Returns `true` if no ids have been allocated.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for Dict {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Dict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dict")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}
