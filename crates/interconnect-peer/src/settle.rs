use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Lock a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One-shot rendezvous: the first `settle` wins, waiters observe that value.
#[derive(Debug)]
pub(crate) struct Settlement<T> {
    value: Mutex<Option<T>>,
    ready: Condvar,
}

impl<T: Clone> Settlement<T> {
    pub(crate) fn new() -> Self {
        Self {
            value: Mutex::new(None),
            ready: Condvar::new(),
        }
    }

    /// Returns `false` if already settled.
    pub(crate) fn settle(&self, value: T) -> bool {
        let mut slot = lock(&self.value);
        if slot.is_some() {
            return false;
        }
        *slot = Some(value);
        self.ready.notify_all();
        true
    }

    #[cfg(test)]
    fn get(&self) -> Option<T> {
        lock(&self.value).clone()
    }

    /// Block until settled or `timeout` elapses.
    pub(crate) fn wait(&self, timeout: Duration) -> Option<T> {
        let slot = lock(&self.value);
        let (slot, _) = self
            .ready
            .wait_timeout_while(slot, timeout, |value| value.is_none())
            .unwrap_or_else(PoisonError::into_inner);
        slot.clone()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn first_settle_wins() {
        let slot = Settlement::new();
        assert!(slot.settle(1));
        assert!(!slot.settle(2));
        assert_eq!(slot.get(), Some(1));
        assert_eq!(slot.wait(Duration::from_millis(1)), Some(1));
    }

    #[test]
    fn wait_times_out() {
        let slot: Settlement<u8> = Settlement::new();
        assert_eq!(slot.wait(Duration::from_millis(20)), None);
    }

    #[test]
    fn wakes_waiter_from_other_thread() {
        let slot = Arc::new(Settlement::new());
        let settler = Arc::clone(&slot);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            settler.settle("done");
        });
        assert_eq!(slot.wait(Duration::from_secs(5)), Some("done"));
        handle.join().unwrap();
    }
}
