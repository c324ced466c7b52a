//! One-shot completion slots.
//!
//! Every blocking point in the bridge (a permission request, a pending remote
//! call) owns its own slot. The [`Completer`] half travels with the callback to
//! whichever thread delivers the result; the [`Completion`] half stays with the
//! waiting caller.
//!
//! The waiter always re-checks the slot under the lock before sleeping, so a
//! value stored before the caller starts waiting is never missed. Dropping a
//! completer without firing it wakes the waiter with [`WaitError::Abandoned`].

use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Why a wait ended without a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitError {
    /// The completer was dropped without delivering a value.
    Abandoned,
    /// The bounded wait expired first.
    TimedOut,
}

enum SlotState<T> {
    Pending,
    Done(T),
    Abandoned,
}

struct Slot<T> {
    state: Mutex<SlotState<T>>,
    ready: Condvar,
}

impl<T> Slot<T> {
    fn lock(&self) -> MutexGuard<'_, SlotState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn fill(&self, next: SlotState<T>) -> bool {
        let mut state = self.lock();
        if !matches!(*state, SlotState::Pending) {
            return false;
        }
        *state = next;
        drop(state);
        self.ready.notify_all();
        true
    }
}

/// Create a connected completer/completion pair.
pub fn channel<T>() -> (Completer<T>, Completion<T>) {
    let slot = Arc::new(Slot {
        state: Mutex::new(SlotState::Pending),
        ready: Condvar::new(),
    });
    (
        Completer {
            slot: Some(slot.clone()),
        },
        Completion { slot },
    )
}

/// Sending half of a one-shot slot.
pub struct Completer<T> {
    slot: Option<Arc<Slot<T>>>,
}

impl<T> Completer<T> {
    /// Deliver the value and wake the waiter.
    ///
    /// Returns false if the slot was already resolved.
    pub fn complete(mut self, value: T) -> bool {
        match self.slot.take() {
            Some(slot) => slot.fill(SlotState::Done(value)),
            None => false,
        }
    }
}

impl<T> Drop for Completer<T> {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            slot.fill(SlotState::Abandoned);
        }
    }
}

impl<T> fmt::Debug for Completer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completer")
            .field("armed", &self.slot.is_some())
            .finish()
    }
}

/// Receiving half of a one-shot slot.
pub struct Completion<T> {
    slot: Arc<Slot<T>>,
}

impl<T> Completion<T> {
    /// Returns true once a value has been delivered or the completer dropped.
    pub fn is_resolved(&self) -> bool {
        !matches!(*self.slot.lock(), SlotState::Pending)
    }

    /// Block until the slot resolves.
    pub fn wait(self) -> Result<T, WaitError> {
        let guard = self.slot.lock();
        let guard = self
            .slot
            .ready
            .wait_while(guard, |state| matches!(state, SlotState::Pending))
            .unwrap_or_else(PoisonError::into_inner);
        Self::take(guard)
    }

    /// Block until the slot resolves or `timeout` elapses.
    ///
    /// A timed out completion can be waited on again; once a value has been
    /// taken, later waits report [`WaitError::Abandoned`].
    pub fn wait_timeout(&self, timeout: Duration) -> Result<T, WaitError> {
        let guard = self.slot.lock();
        let (guard, _) = self
            .slot
            .ready
            .wait_timeout_while(guard, timeout, |state| matches!(state, SlotState::Pending))
            .unwrap_or_else(PoisonError::into_inner);
        Self::take(guard)
    }

    /// Wait with an optional bound.
    pub fn wait_for(self, timeout: Option<Duration>) -> Result<T, WaitError> {
        match timeout {
            Some(timeout) => self.wait_timeout(timeout),
            None => self.wait(),
        }
    }

    fn take(mut guard: MutexGuard<'_, SlotState<T>>) -> Result<T, WaitError> {
        match std::mem::replace(&mut *guard, SlotState::Abandoned) {
            SlotState::Done(value) => Ok(value),
            SlotState::Abandoned => Err(WaitError::Abandoned),
            SlotState::Pending => {
                *guard = SlotState::Pending;
                Err(WaitError::TimedOut)
            }
        }
    }
}

impl<T> fmt::Debug for Completion<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::thread;

    use super::*;

    #[test]
    fn test_value_delivered_before_wait() {
        let (completer, completion) = channel();
        assert!(completer.complete(7));
        assert!(completion.is_resolved());
        assert_eq!(completion.wait(), Ok(7));
    }

    #[test]
    fn test_value_delivered_from_other_thread() {
        let (completer, completion) = channel();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            completer.complete("done")
        });
        assert_eq!(completion.wait(), Ok("done"));
        assert!(handle.join().unwrap());
    }

    #[test]
    fn test_dropped_completer_releases_waiter() {
        let (completer, completion) = channel::<u32>();
        thread::spawn(move || drop(completer));
        assert_eq!(completion.wait(), Err(WaitError::Abandoned));
    }

    #[test]
    fn test_wait_timeout_expires() {
        let (_completer, completion) = channel::<u32>();
        assert_eq!(
            completion.wait_timeout(Duration::from_millis(10)),
            Err(WaitError::TimedOut)
        );
    }

    #[test]
    fn test_wait_again_after_timeout() {
        let (completer, completion) = channel();
        assert_eq!(
            completion.wait_timeout(Duration::from_millis(5)),
            Err(WaitError::TimedOut)
        );
        assert!(completer.complete("late"));
        assert_eq!(completion.wait_timeout(Duration::from_millis(5)), Ok("late"));
        assert_eq!(completion.wait(), Err(WaitError::Abandoned));
    }

    #[test]
    fn test_wait_for_without_bound() {
        let (completer, completion) = channel();
        completer.complete(1);
        assert_eq!(completion.wait_for(None), Ok(1));
    }
}
