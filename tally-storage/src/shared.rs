use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use crate::config::StorageConfig;
use crate::storage::Storage;

/// A [`Storage`] shared between multiple ingest workers.
///
/// Interning a string and aggregating metrics for its key must be observed in the same order by
/// all readers, so every write and every report holds the lock for the full sequence of
/// operations. Cloning the handle shares the same storage.
#[derive(Clone, Debug, Default)]
pub struct SharedStorage {
    inner: Arc<Mutex<Storage>>,
}

impl SharedStorage {
    /// Creates an empty shared storage.
    pub fn new(config: StorageConfig) -> Self {
        Self::from(Storage::new(config))
    }

    /// Acquires the lock and returns a guard to the storage.
    ///
    /// The lock is released when the guard is dropped.
    pub fn lock(&self) -> MutexGuard<'_, Storage> {
        self.inner.lock()
    }

    /// Runs `f` while holding the lock.
    pub fn with<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut Storage) -> R,
    {
        f(&mut self.inner.lock())
    }
}

impl From<Storage> for SharedStorage {
    fn from(storage: Storage) -> Self {
        Self {
            inner: Arc::new(Mutex::new(storage)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use tally_common::NumDate;

    use super::*;
    use crate::Module;

    #[test]
    fn test_concurrent_ingestion() {
        let shared = SharedStorage::default();
        let date = NumDate::new(20200427).unwrap();

        let workers: Vec<_> = (0..4)
            .map(|_| {
                let shared = shared.clone();
                thread::spawn(move || {
                    for _ in 0..100 {
                        shared.with(|storage| {
                            let key = storage.insert_keymap(Module::Requests, date, "/index.php");
                            storage.insert_hits(Module::Requests, date, key.key, 1, key.ckey);
                        });
                    }
                })
            })
            .collect();

        for worker in workers {
            worker.join().unwrap();
        }

        let storage = shared.lock();
        assert_eq!(storage.get_hits(Module::Requests, 1), Some(400));
        assert_eq!(storage.size_datamap(Module::Requests), 0);
    }
}
