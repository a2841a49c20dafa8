//! Per-thread markers for variables, containers and projects being resolved
//!
//! A thread that asks for something it is already computing gets told so
//! instead of recursing or blocking. Other threads are not affected: two
//! threads may initialize the same container concurrently.

use std::cell::RefCell;
use std::collections::HashSet;
use std::path::PathBuf;

use grove_core::ProjectId;

/// What is being computed, scoped by the manager instance that computes it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum InFlightKey {
    Variable { context: u64, name: String },
    Container { context: u64, project: ProjectId, path: PathBuf },
    Project { context: u64, project: ProjectId },
}

thread_local! {
    static IN_FLIGHT: RefCell<HashSet<InFlightKey>> = RefCell::new(HashSet::new());
}

/// Clears its marker when dropped, including on unwinding.
#[derive(Debug)]
pub struct InFlightGuard {
    key: InFlightKey,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        IN_FLIGHT.with(|set| {
            set.borrow_mut().remove(&self.key);
        });
    }
}

/// Mark `key` as in progress on this thread. `None` if it already is.
pub fn enter(key: InFlightKey) -> Option<InFlightGuard> {
    IN_FLIGHT.with(|set| {
        if set.borrow_mut().insert(key.clone()) {
            Some(InFlightGuard { key })
        } else {
            None
        }
    })
}

pub fn is_in_flight(key: &InFlightKey) -> bool {
    IN_FLIGHT.with(|set| set.borrow().contains(key))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(name: &str) -> InFlightKey {
        InFlightKey::Variable {
            context: 7,
            name: name.to_string(),
        }
    }

    #[test]
    fn test_reentry_is_detected_until_guard_drops() {
        let guard = enter(key("A")).unwrap();
        assert!(is_in_flight(&key("A")));
        assert!(enter(key("A")).is_none());
        assert!(enter(key("B")).is_some());

        drop(guard);
        assert!(!is_in_flight(&key("A")));
    }

    #[test]
    fn test_markers_are_per_thread() {
        let _guard = enter(key("shared")).unwrap();
        let other = std::thread::spawn(|| enter(key("shared")).is_some()).join().unwrap();
        assert!(other);
    }
}
