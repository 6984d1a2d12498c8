use std::sync::{Arc, Mutex, MutexGuard};

/// Something stored in a [`DeviceRegistry`], identified by a native handle.
pub trait Registered {
    type Key: PartialEq + Copy + std::fmt::Debug;
    fn key(&self) -> Self::Key;
}

/// Ordered, append-only collection guarded by one mutex for every insert,
/// lookup and erase. Entries are shared out as `Arc`s so a lookup never holds
/// the lock across caller code.
pub struct DeviceRegistry<T> {
    entries: Mutex<Vec<Arc<T>>>,
}

impl<T> Default for DeviceRegistry<T> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }
}

impl<T: Registered> DeviceRegistry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Arc<T>>> {
        match self.entries.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn push(&self, v: T) -> Arc<T> {
        let v = Arc::new(v);
        self.lock().push(Arc::clone(&v));
        v
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The only entry. Panics unless exactly one is registered.
    pub fn single(&self) -> Arc<T> {
        let entries = self.lock();
        assert_eq!(entries.len(), 1, "expected exactly one logical device");
        Arc::clone(&entries[0])
    }

    /// Linear scan by key; no match is `None`, not an error.
    pub fn find(&self, key: T::Key) -> Option<Arc<T>> {
        self.lock().iter().find(|e| e.key() == key).cloned()
    }

    /// Removes and returns the entry with `key`.
    pub fn remove(&self, key: T::Key) -> Option<Arc<T>> {
        let mut entries = self.lock();
        let idx = entries.iter().position(|e| e.key() == key)?;
        Some(entries.remove(idx))
    }

    /// Removes every entry, oldest first.
    pub fn drain(&self) -> Vec<Arc<T>> {
        std::mem::take(&mut *self.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Fake(u64);

    impl Registered for Fake {
        type Key = u64;
        fn key(&self) -> u64 {
            self.0
        }
    }

    #[test]
    fn single_with_one_entry() {
        let reg = DeviceRegistry::new();
        reg.push(Fake(7));
        assert_eq!(reg.single().0, 7);
    }

    #[test]
    #[should_panic(expected = "exactly one")]
    fn single_with_no_entries() {
        let reg: DeviceRegistry<Fake> = DeviceRegistry::new();
        reg.single();
    }

    #[test]
    #[should_panic(expected = "exactly one")]
    fn single_with_two_entries() {
        let reg = DeviceRegistry::new();
        reg.push(Fake(1));
        reg.push(Fake(2));
        reg.single();
    }

    #[test]
    fn find_and_remove() {
        let reg = DeviceRegistry::new();
        for k in 1..=3 {
            reg.push(Fake(k));
        }
        assert_eq!(reg.find(2).map(|f| f.0), Some(2));
        assert!(reg.find(9).is_none());

        assert_eq!(reg.remove(2).map(|f| f.0), Some(2));
        assert!(reg.remove(2).is_none());
        assert_eq!(reg.len(), 2);

        let order: Vec<u64> = reg.drain().iter().map(|f| f.0).collect();
        assert_eq!(order, vec![1, 3]);
        assert!(reg.is_empty());
    }

    #[test]
    fn concurrent_push() {
        let reg = Arc::new(DeviceRegistry::new());
        let threads: Vec<_> = (0..4)
            .map(|i| {
                let reg = Arc::clone(&reg);
                std::thread::spawn(move || {
                    reg.push(Fake(i));
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(reg.len(), 4);
    }
}
