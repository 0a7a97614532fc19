//! Open-addressed, linear-probed hash table keyed by interned strings (§2
//! "Hash Table").
//!
//! Because string keys are always interned `ObjRef`s, key comparison during
//! probing is index equality — no string content is ever touched here. The
//! hash of the key is supplied by the caller (it lives on the `ObjString`
//! itself, computed once at intern time), so this type never needs to look
//! anything up in the `Heap`; it only needs hashes, indices, and `Value`s.
//! That keeps "Hash Table" and "Heap Object" genuinely separate components,
//! as the design's component table calls for.

use crate::object::ObjRef;
use crate::value::Value;

const MAX_LOAD: f64 = 0.75;

struct Entry {
    /// `None` means either an untouched empty slot or a tombstone left by a
    /// delete. The two are disambiguated by `tombstone`.
    key: Option<ObjRef>,
    hash: u32,
    value: Value,
    tombstone: bool,
}

impl Entry {
    fn empty() -> Self {
        Entry {
            key: None,
            hash: 0,
            value: Value::Null,
            tombstone: false,
        }
    }
}

pub struct Table {
    entries: Vec<Entry>,
    /// Active entries plus tombstones — what drives the growth decision,
    /// matching the reference table's `count` field.
    count: usize,
}

impl Default for Table {
    fn default() -> Self {
        Self::new()
    }
}

impl Table {
    pub fn new() -> Self {
        Table {
            entries: Vec::new(),
            count: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.iter().filter(|e| e.key.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn find_entry(entries: &[Entry], capacity: usize, key: ObjRef, hash: u32) -> usize {
        let mut index = (hash as usize) % capacity;
        let mut first_tombstone: Option<usize> = None;
        loop {
            let entry = &entries[index];
            match entry.key {
                None if !entry.tombstone => {
                    return first_tombstone.unwrap_or(index);
                }
                None => {
                    if first_tombstone.is_none() {
                        first_tombstone = Some(index);
                    }
                }
                Some(k) if k == key => return index,
                Some(_) => {}
            }
            index = (index + 1) % capacity;
        }
    }

    fn grow(&mut self, new_capacity: usize) {
        let mut new_entries: Vec<Entry> = (0..new_capacity).map(|_| Entry::empty()).collect();
        let mut new_count = 0;
        for entry in &self.entries {
            if let Some(key) = entry.key {
                let idx = Self::find_entry(&new_entries, new_capacity, key, entry.hash);
                new_entries[idx] = Entry {
                    key: Some(key),
                    hash: entry.hash,
                    value: entry.value,
                    tombstone: false,
                };
                new_count += 1;
            }
        }
        self.entries = new_entries;
        self.count = new_count;
    }

    /// Insert or overwrite `key -> value`. Returns `true` if this created a
    /// new entry (matching the reference table's `tableSet` return value,
    /// used by globals/fields code to detect "already defined").
    pub fn set(&mut self, key: ObjRef, hash: u32, value: Value) -> bool {
        if self.entries.is_empty() || (self.count + 1) as f64 > self.entries.len() as f64 * MAX_LOAD
        {
            let new_cap = if self.entries.is_empty() {
                8
            } else {
                self.entries.len() * 2
            };
            self.grow(new_cap);
        }
        let capacity = self.entries.len();
        let idx = Self::find_entry(&self.entries, capacity, key, hash);
        let is_new = self.entries[idx].key.is_none();
        if is_new && !self.entries[idx].tombstone {
            self.count += 1;
        }
        self.entries[idx] = Entry {
            key: Some(key),
            hash,
            value,
            tombstone: false,
        };
        is_new
    }

    pub fn get(&self, key: ObjRef, hash: u32) -> Option<Value> {
        if self.entries.is_empty() {
            return None;
        }
        let capacity = self.entries.len();
        let idx = Self::find_entry(&self.entries, capacity, key, hash);
        match self.entries[idx].key {
            Some(k) if k == key => Some(self.entries[idx].value),
            _ => None,
        }
    }

    pub fn contains(&self, key: ObjRef, hash: u32) -> bool {
        self.get(key, hash).is_some()
    }

    pub fn delete(&mut self, key: ObjRef, hash: u32) -> bool {
        if self.entries.is_empty() {
            return false;
        }
        let capacity = self.entries.len();
        let idx = Self::find_entry(&self.entries, capacity, key, hash);
        if self.entries[idx].key != Some(key) {
            return false;
        }
        self.entries[idx] = Entry {
            key: None,
            hash: 0,
            value: Value::Null,
            tombstone: true,
        };
        true
    }

    /// Iterate live entries. Used by the GC to mark keys and values, and by
    /// `OP_INHERIT` to copy a parent class's method table wholesale.
    pub fn iter(&self) -> impl Iterator<Item = (ObjRef, Value)> + '_ {
        self.entries
            .iter()
            .filter_map(|e| e.key.map(|k| (k, e.value)))
    }

    /// Remove every entry whose key is not in `keep`. Used by the GC's
    /// "sweep string table first" step on the intern table (§4.4): entries
    /// whose string was not marked reachable this cycle are weak references
    /// and must be dropped before the underlying objects are freed.
    pub fn retain_keys(&mut self, mut keep: impl FnMut(ObjRef) -> bool) {
        for entry in &mut self.entries {
            if let Some(k) = entry.key {
                if !keep(k) {
                    *entry = Entry {
                        key: None,
                        hash: 0,
                        value: Value::Null,
                        tombstone: true,
                    };
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn k(i: u32) -> ObjRef {
        ObjRef(i)
    }

    #[test]
    fn set_get_roundtrip() {
        let mut t = Table::new();
        assert!(t.set(k(1), 11, Value::Number(1.0)));
        assert!(!t.set(k(1), 11, Value::Number(2.0)));
        assert_eq!(t.get(k(1), 11).unwrap().as_number(), Some(2.0));
    }

    #[test]
    fn delete_then_reinsert() {
        let mut t = Table::new();
        t.set(k(1), 11, Value::Number(1.0));
        assert!(t.delete(k(1), 11));
        assert!(t.get(k(1), 11).is_none());
        assert!(t.set(k(1), 11, Value::Number(3.0)));
        assert_eq!(t.get(k(1), 11).unwrap().as_number(), Some(3.0));
    }

    #[test]
    fn grows_past_load_factor() {
        let mut t = Table::new();
        for i in 0..100u32 {
            t.set(k(i), i * 2654435761, Value::Number(i as f64));
        }
        assert_eq!(t.len(), 100);
        for i in 0..100u32 {
            assert_eq!(
                t.get(k(i), i * 2654435761).unwrap().as_number(),
                Some(i as f64)
            );
        }
    }

    #[test]
    fn tombstones_do_not_break_probing() {
        let mut t = Table::new();
        for i in 0..8u32 {
            t.set(k(i), i, Value::Number(i as f64));
        }
        t.delete(k(3), 3);
        t.delete(k(5), 5);
        for i in 0..8u32 {
            if i == 3 || i == 5 {
                assert!(t.get(k(i), i).is_none());
            } else {
                assert_eq!(t.get(k(i), i).unwrap().as_number(), Some(i as f64));
            }
        }
    }
}
