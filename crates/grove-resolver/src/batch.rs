//! Workspace-wide batch initialization of containers

use std::thread::ThreadId;

use parking_lot::{Mutex, MutexGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    Idle,
    /// The next container request runs a pass over every project.
    Needed,
    InProgress,
    Finished,
}

/// How a container request takes part in batching.
#[derive(Debug)]
pub enum BatchRole<'a> {
    /// This thread owns the pass and must run it, then call `finish` before
    /// dropping the guard.
    RunPass(MutexGuard<'a, ()>),
    /// Another thread runs the pass; wait for it with `wait_for_pass`.
    JoinPass,
    /// Initialize just the requested container.
    Single,
}

struct Inner {
    state: BatchState,
    owner: Option<ThreadId>,
    init_after_load: bool,
}

/// `Idle → Needed → InProgress → Finished` state machine coalescing container
/// initialization into one pass. The pass itself runs under the pass lock, so a
/// thread arriving mid-pass is serialized behind it.
pub struct BatchInitialization {
    inner: Mutex<Inner>,
    pass: Mutex<()>,
}

impl BatchInitialization {
    pub fn new() -> Self {
        BatchInitialization {
            inner: Mutex::new(Inner {
                state: BatchState::Idle,
                owner: None,
                init_after_load: false,
            }),
            pass: Mutex::new(()),
        }
    }

    pub fn state(&self) -> BatchState {
        self.inner.lock().state
    }

    /// Request a batch pass. With `init_after_load` the caller intends to run
    /// it right away rather than on the next container request.
    pub fn force(&self, init_after_load: bool) {
        let mut inner = self.inner.lock();
        if inner.state != BatchState::InProgress {
            inner.state = BatchState::Needed;
        }
        inner.init_after_load |= init_after_load;
    }

    pub fn init_after_load(&self) -> bool {
        self.inner.lock().init_after_load
    }

    /// The pass lock is taken before the state turns `InProgress`, so a
    /// thread told to join always finds the pass running.
    pub fn enter(&self) -> BatchRole<'_> {
        let current = std::thread::current().id();
        let mut inner = self.inner.lock();
        match inner.state {
            BatchState::Needed => {
                let pass = self.pass.lock();
                inner.state = BatchState::InProgress;
                inner.owner = Some(current);
                BatchRole::RunPass(pass)
            }
            BatchState::InProgress if inner.owner == Some(current) => BatchRole::Single,
            BatchState::InProgress => BatchRole::JoinPass,
            BatchState::Idle | BatchState::Finished => BatchRole::Single,
        }
    }

    /// Block until the running pass (if any) completes.
    pub fn wait_for_pass(&self) {
        drop(self.pass.lock());
    }

    pub fn finish(&self) {
        let mut inner = self.inner.lock();
        inner.state = BatchState::Finished;
        inner.owner = None;
        inner.init_after_load = false;
    }
}

impl Default for BatchInitialization {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Barrier;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_state_machine() {
        let batch = BatchInitialization::new();
        assert!(matches!(batch.enter(), BatchRole::Single));

        batch.force(false);
        assert_eq!(batch.state(), BatchState::Needed);
        let pass = batch.enter();
        assert!(matches!(pass, BatchRole::RunPass(_)));
        assert_eq!(batch.state(), BatchState::InProgress);
        // nested requests on the owning thread stay single
        assert!(matches!(batch.enter(), BatchRole::Single));

        let joins = std::thread::scope(|s| {
            s.spawn(|| matches!(batch.enter(), BatchRole::JoinPass))
                .join()
                .unwrap()
        });
        assert!(joins);

        batch.finish();
        drop(pass);
        assert_eq!(batch.state(), BatchState::Finished);
        assert!(matches!(batch.enter(), BatchRole::Single));
    }

    #[test]
    fn test_force_during_pass_keeps_pass_running() {
        let batch = BatchInitialization::new();
        batch.force(false);
        let _pass = batch.enter();
        batch.force(true);
        assert_eq!(batch.state(), BatchState::InProgress);
        assert!(batch.init_after_load());
    }

    #[test]
    fn test_joiner_waits_for_running_pass() {
        let batch = BatchInitialization::new();
        let finished = AtomicBool::new(false);
        let joined = Barrier::new(2);
        batch.force(false);

        std::thread::scope(|s| {
            let BatchRole::RunPass(pass) = batch.enter() else {
                panic!("expected to own the pass");
            };
            let joiner = s.spawn(|| {
                let role = batch.enter();
                joined.wait();
                assert!(matches!(role, BatchRole::JoinPass));
                batch.wait_for_pass();
                finished.load(Ordering::SeqCst)
            });

            joined.wait();
            std::thread::sleep(Duration::from_millis(20));
            finished.store(true, Ordering::SeqCst);
            batch.finish();
            drop(pass);
            // the joiner only got past the pass once it was over
            assert!(joiner.join().unwrap());
        });
    }
}
