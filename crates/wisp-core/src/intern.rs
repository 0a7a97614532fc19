//! The interned string table (§2 "Interned String Table", §3 "Every String
//! reachable from any Value is in the intern table").
//!
//! This keeps its own copy of each key's bytes so that probing never needs
//! to borrow into the `Heap`'s object arena — a small duplication (the
//! `ObjString` on the heap holds the canonical copy) in exchange for the
//! interner being a self-contained, independently testable structure. The
//! table is a weak map: it is walked and pruned during `Heap::sweep` (§4.4,
//! "Sweep string table first") before any object is actually freed, so a
//! string that nothing else references does not stay alive just because it
//! is interned.

use crate::object::ObjRef;

struct InternEntry {
    bytes: Box<str>,
    hash: u32,
    obj: ObjRef,
}

#[derive(Default)]
pub struct Interner {
    entries: Vec<Option<InternEntry>>,
    count: usize,
}

const MAX_LOAD: f64 = 0.75;

impl Interner {
    pub fn new() -> Self {
        Interner::default()
    }

    pub fn find(&self, bytes: &str, hash: u32) -> Option<ObjRef> {
        if self.entries.is_empty() {
            return None;
        }
        let capacity = self.entries.len();
        let mut index = (hash as usize) % capacity;
        loop {
            match &self.entries[index] {
                None => return None,
                Some(e) if e.hash == hash && e.bytes.as_ref() == bytes => return Some(e.obj),
                Some(_) => {}
            }
            index = (index + 1) % capacity;
        }
    }

    pub fn insert(&mut self, bytes: &str, hash: u32, obj: ObjRef) {
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
        let mut index = (hash as usize) % capacity;
        loop {
            if self.entries[index].is_none() {
                self.entries[index] = Some(InternEntry {
                    bytes: bytes.into(),
                    hash,
                    obj,
                });
                self.count += 1;
                return;
            }
            index = (index + 1) % capacity;
        }
    }

    fn grow(&mut self, new_capacity: usize) {
        let mut old = std::mem::take(&mut self.entries);
        self.entries = (0..new_capacity).map(|_| None).collect();
        self.count = 0;
        for slot in old.drain(..).flatten() {
            let capacity = self.entries.len();
            let mut index = (slot.hash as usize) % capacity;
            while self.entries[index].is_some() {
                index = (index + 1) % capacity;
            }
            self.entries[index] = Some(slot);
            self.count += 1;
        }
    }

    /// Drop every entry whose target object was not marked this collection
    /// cycle (§4.4). Must run before the arena actually frees those slots.
    pub fn retain(&mut self, is_marked: impl Fn(ObjRef) -> bool) {
        for slot in &mut self.entries {
            if let Some(e) = slot {
                if !is_marked(e.obj) {
                    *slot = None;
                    self.count -= 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_after_insert() {
        let mut interner = Interner::new();
        interner.insert("hello", 42, ObjRef(0));
        assert_eq!(interner.find("hello", 42), Some(ObjRef(0)));
        assert_eq!(interner.find("nope", 99), None);
    }

    #[test]
    fn retain_drops_unmarked() {
        let mut interner = Interner::new();
        interner.insert("a", 1, ObjRef(0));
        interner.insert("b", 2, ObjRef(1));
        interner.retain(|r| r == ObjRef(1));
        assert_eq!(interner.find("a", 1), None);
        assert_eq!(interner.find("b", 2), Some(ObjRef(1)));
    }
}
