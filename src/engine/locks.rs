use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Table of named mutexes. An entry lives only while someone holds or awaits it.
#[derive(Clone, Default)]
pub struct KeyLocks {
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive ownership of `name`.
    pub async fn acquire(&self, name: String) -> KeyLockGuard {
        let mutex = self
            .locks
            .entry(name.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = mutex.lock_owned().await;
        KeyLockGuard {
            name,
            locks: self.locks.clone(),
            guard: Some(guard),
        }
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

pub struct KeyLockGuard {
    name: String,
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl KeyLockGuard {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for KeyLockGuard {
    fn drop(&mut self) {
        // Release first so the strong count reflects only the table and waiters.
        drop(self.guard.take());
        self.locks
            .remove_if(&self.name, |_, m| Arc::strong_count(m) == 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_key_serializes() {
        let locks = KeyLocks::new();
        let first = locks.acquire("scope:k".into()).await;

        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _g = locks.acquire("scope:k".into()).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(first);
        tokio::time::timeout(Duration::from_secs(1), contender)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn different_keys_do_not_block() {
        let locks = KeyLocks::new();
        let _a = locks.acquire("scope:a".into()).await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.acquire("scope:b".into()))
            .await
            .unwrap();
        assert_eq!(b.name(), "scope:b");
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test]
    async fn entries_removed_when_released() {
        let locks = KeyLocks::new();
        {
            let _g = locks.acquire("scope:gone".into()).await;
            assert_eq!(locks.len(), 1);
        }
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn entry_survives_while_waiter_queued() {
        let locks = KeyLocks::new();
        let first = locks.acquire("scope:w".into()).await;
        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _g = locks.acquire("scope:w".into()).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(first);
        assert_eq!(locks.len(), 1);
        waiter.await.unwrap();
        assert!(locks.is_empty());
    }
}
