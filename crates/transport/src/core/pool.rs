//! A generic round-robin pool used to spread sends across the data channels
//! of a single connection.

use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::Error;
use crate::error::Result;

/// A pool that hands out its elements in round-robin order. Elements are
/// pushed while the connection is being built and selected on every send.
pub struct RoundRobinPool<T: Clone> {
    pool: RwLock<Vec<T>>,
    idx: AtomicUsize,
}

impl<T: Clone> Default for RoundRobinPool<T> {
    fn default() -> Self {
        Self {
            pool: RwLock::new(Vec::new()),
            idx: AtomicUsize::new(0),
        }
    }
}

impl<T: Clone> RoundRobinPool<T> {
    /// Append an element to the pool.
    pub fn push(&self, item: T) -> Result<()> {
        let mut pool = self
            .pool
            .write()
            .map_err(|_| Error::DataChannelPool("Lock poisoned".to_string()))?;
        pool.push(item);
        Ok(())
    }

    /// Select the next element in round-robin order.
    pub fn select(&self) -> Result<T> {
        let pool = self
            .pool
            .read()
            .map_err(|_| Error::DataChannelPool("Lock poisoned".to_string()))?;

        if pool.is_empty() {
            return Err(Error::DataChannelPool("Pool is empty".to_string()));
        }

        let len = pool.len();
        let idx = self
            .idx
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |x| Some((x + 1) % len))
            .unwrap_or(0);

        Ok(pool[idx % len].clone())
    }

    /// Check `predicate` against every element. An empty pool is not ready.
    pub fn all<F>(&self, predicate: F) -> Result<bool>
    where F: Fn(&T) -> bool {
        let pool = self
            .pool
            .read()
            .map_err(|_| Error::DataChannelPool("Lock poisoned".to_string()))?;
        Ok(!pool.is_empty() && pool.iter().all(predicate))
    }
}

/// A pool that can send messages through its elements.
#[async_trait]
pub trait MessageSenderPool<T>: Send + Sync {
    /// The message type accepted by [MessageSenderPool::send].
    type Message;
    /// Send a message through the next pooled element.
    async fn send(&self, msg: Self::Message) -> Result<()>;
}

/// A pool that can report whether all of its elements are ready for use.
pub trait StatusPool<T> {
    /// True when every pooled element is ready.
    fn all_ready(&self) -> Result<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_robin_selection() {
        let pool = RoundRobinPool::<usize>::default();
        assert!(pool.select().is_err());

        for x in [1, 2, 3] {
            pool.push(x).unwrap();
        }

        assert_eq!(pool.select().unwrap(), 1);
        assert_eq!(pool.select().unwrap(), 2);
        assert_eq!(pool.select().unwrap(), 3);
        assert_eq!(pool.select().unwrap(), 1);
    }

    #[test]
    fn test_all_predicate() {
        let pool = RoundRobinPool::<usize>::default();
        assert!(!pool.all(|_| true).unwrap());

        pool.push(2).unwrap();
        pool.push(4).unwrap();
        assert!(pool.all(|x| x % 2 == 0).unwrap());

        pool.push(5).unwrap();
        assert!(!pool.all(|x| x % 2 == 0).unwrap());
    }
}
