use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use crate::compiler::CompiledAction;

/// Upper bound on idle vectors kept for reuse
const MAX_IDLE: usize = 64;

/// Lends scratch vectors used as short action sequences for sub-dispatch
#[derive(Debug, Default)]
pub struct SequencePool {
    idle: Mutex<Vec<Vec<Arc<CompiledAction>>>>,
    outstanding: AtomicUsize,
}

impl SequencePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide pool used by contexts that were not given one
    pub fn shared() -> Arc<SequencePool> {
        static SHARED: OnceLock<Arc<SequencePool>> = OnceLock::new();
        SHARED.get_or_init(|| Arc::new(SequencePool::new())).clone()
    }

    /// Borrow an empty sequence; it is returned when the guard drops
    pub fn rent(self: &Arc<Self>) -> PooledSequence {
        let items = self
            .idle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop()
            .unwrap_or_default();
        self.outstanding.fetch_add(1, Ordering::SeqCst);

        PooledSequence {
            items: Some(items),
            pool: self.clone(),
        }
    }

    /// Number of sequences currently rented out
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }

    fn give_back(&self, mut items: Vec<Arc<CompiledAction>>) {
        items.clear();
        self.outstanding.fetch_sub(1, Ordering::SeqCst);
        let mut idle = self
            .idle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if idle.len() < MAX_IDLE {
            idle.push(items);
        }
    }
}

/// A rented sequence; dropping it hands the storage back exactly once
#[derive(Debug)]
pub struct PooledSequence {
    items: Option<Vec<Arc<CompiledAction>>>,
    pool: Arc<SequencePool>,
}

impl PooledSequence {
    pub fn push(&mut self, action: Arc<CompiledAction>) {
        if let Some(items) = self.items.as_mut() {
            items.push(action);
        }
    }
}

impl Deref for PooledSequence {
    type Target = [Arc<CompiledAction>];

    fn deref(&self) -> &Self::Target {
        self.items.as_deref().unwrap_or(&[])
    }
}

impl Drop for PooledSequence {
    fn drop(&mut self) {
        if let Some(items) = self.items.take() {
            self.pool.give_back(items);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rent_and_return() {
        let pool = Arc::new(SequencePool::new());
        let first = pool.rent();
        let second = pool.rent();
        assert_eq!(pool.outstanding(), 2);

        drop(first);
        assert_eq!(pool.outstanding(), 1);
        drop(second);
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn test_returned_on_unwind() {
        let pool = Arc::new(SequencePool::new());
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _sequence = pool.rent();
            panic!("handler blew up");
        }));

        assert!(result.is_err());
        assert_eq!(pool.outstanding(), 0);
    }
}
