//! Bookkeeping shared by device-owned objects.

use std::sync::Arc;
use std::time::{Duration, Instant};

/// Parent context plus creation timestamp, embedded by every long-lived
/// object the pool machinery creates.
pub struct ObjectBase<C> {
    context: Arc<C>,
    created_at: Instant,
}

impl<C> ObjectBase<C> {
    pub fn new(context: Arc<C>) -> Self {
        Self {
            context,
            created_at: Instant::now(),
        }
    }

    pub fn context(&self) -> &Arc<C> {
        &self.context
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Time elapsed since this object was created.
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }
}

impl<C> std::fmt::Debug for ObjectBase<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectBase")
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn age_is_monotonic() {
        let base = ObjectBase::new(Arc::new(()));
        let earlier = base.age();
        std::thread::sleep(Duration::from_millis(1));
        assert!(base.age() > earlier);
        assert!(base.created_at() <= Instant::now());
    }

    #[test]
    fn creation_order_is_observable() {
        let first = ObjectBase::new(Arc::new(()));
        std::thread::sleep(Duration::from_millis(1));
        let second = ObjectBase::new(Arc::new(()));
        assert!(first.created_at() < second.created_at());
    }
}
