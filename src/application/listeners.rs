// Observer list with register/unregister handles and isolated delivery
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Callback<T> = Arc<dyn Fn(&T) -> anyhow::Result<()> + Send + Sync>;

/// Subscriber list. Cloning shares the underlying list.
pub struct Listeners<T> {
    name: &'static str,
    next_id: Arc<AtomicU64>,
    entries: Arc<Mutex<Vec<(ListenerId, Callback<T>)>>>,
}

impl<T> Clone for Listeners<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            next_id: self.next_id.clone(),
            entries: self.entries.clone(),
        }
    }
}

impl<T> Listeners<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            next_id: Arc::new(AtomicU64::new(1)),
            entries: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn register<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&T) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries.lock().push((id, Arc::new(callback)));
        id
    }

    /// Returns false if the handle was already gone.
    pub fn unregister(&self, id: ListenerId) -> bool {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|(existing, _)| *existing != id);
        entries.len() != before
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver `value` to every listener. Returns how many listeners failed.
    ///
    /// The list is snapshotted first, so callbacks may register or unregister
    /// without deadlocking. An error or panic in one listener is logged and
    /// does not stop delivery to the others.
    pub fn notify(&self, value: &T) -> usize {
        let snapshot: Vec<(ListenerId, Callback<T>)> = self.entries.lock().clone();
        let mut failures = 0;

        for (id, callback) in snapshot {
            match catch_unwind(AssertUnwindSafe(|| callback(value))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    failures += 1;
                    tracing::warn!("{} listener {:?} failed: {}", self.name, id, e);
                }
                Err(_) => {
                    failures += 1;
                    tracing::warn!("{} listener {:?} panicked", self.name, id);
                }
            }
        }

        failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_register_and_unregister() {
        let listeners: Listeners<u32> = Listeners::new("test");
        let seen = Arc::new(AtomicUsize::new(0));

        let seen_clone = seen.clone();
        let id = listeners.register(move |v| {
            seen_clone.fetch_add(*v as usize, Ordering::SeqCst);
            Ok(())
        });

        listeners.notify(&3);
        assert!(listeners.unregister(id));
        assert!(!listeners.unregister(id));
        listeners.notify(&3);

        assert_eq!(seen.load(Ordering::SeqCst), 3);
        assert!(listeners.is_empty());
    }

    #[test]
    fn test_failing_listener_does_not_block_others() {
        let listeners: Listeners<u32> = Listeners::new("test");
        let seen = Arc::new(AtomicUsize::new(0));

        listeners.register(|_| anyhow::bail!("boom"));
        listeners.register(|_| panic!("listener bug"));
        let seen_clone = seen.clone();
        listeners.register(move |_| {
            seen_clone.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        assert_eq!(listeners.notify(&1), 2);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_listener_can_unregister_itself() {
        let listeners: Listeners<u32> = Listeners::new("test");
        let handle = listeners.clone();
        let slot = Arc::new(Mutex::new(None));

        let slot_clone = slot.clone();
        let id = listeners.register(move |_| {
            if let Some(id) = *slot_clone.lock() {
                handle.unregister(id);
            }
            Ok(())
        });
        *slot.lock() = Some(id);

        listeners.notify(&1);
        assert!(listeners.is_empty());
    }
}
