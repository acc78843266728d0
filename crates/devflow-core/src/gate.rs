//! Callback gate
//!
//! Guarantees that once [`CallbackGate::close`] returns, no callback guarded
//! by the gate is running or will run. A callback that closes its own gate
//! does not deadlock: the lock is re-entrant on the thread running it.

use parking_lot::ReentrantMutex;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug)]
pub(crate) struct CallbackGate {
    open: AtomicBool,
    running: ReentrantMutex<()>,
}

impl CallbackGate {
    pub(crate) fn new() -> Self {
        Self {
            open: AtomicBool::new(true),
            running: ReentrantMutex::new(()),
        }
    }

    pub(crate) fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Run `f` unless the gate is closed; returns whether it ran
    pub(crate) fn run(&self, f: impl FnOnce()) -> bool {
        let _guard = self.running.lock();
        if !self.is_open() {
            return false;
        }
        f();
        true
    }

    /// Close the gate and wait for a running callback to finish
    ///
    /// Returns `false` if it was already closed.
    pub(crate) fn close(&self) -> bool {
        let was_open = self.open.swap(false, Ordering::SeqCst);
        drop(self.running.lock());
        was_open
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn closed_gate_skips_callbacks() {
        let gate = CallbackGate::new();
        assert!(gate.run(|| {}));
        assert!(gate.close());
        assert!(!gate.close());
        assert!(!gate.run(|| panic!("must not run")));
    }

    #[test]
    fn close_waits_for_running_callback() {
        let gate = Arc::new(CallbackGate::new());
        let finished = Arc::new(AtomicBool::new(false));
        let (started_tx, started_rx) = std::sync::mpsc::channel();

        let worker = {
            let gate = Arc::clone(&gate);
            let finished = Arc::clone(&finished);
            std::thread::spawn(move || {
                gate.run(|| {
                    started_tx.send(()).unwrap();
                    std::thread::sleep(Duration::from_millis(50));
                    finished.store(true, Ordering::SeqCst);
                });
            })
        };

        started_rx.recv().unwrap();
        gate.close();
        assert!(finished.load(Ordering::SeqCst));
        worker.join().unwrap();
    }

    #[test]
    fn callback_may_close_its_own_gate() {
        let gate = CallbackGate::new();
        assert!(gate.run(|| {
            gate.close();
        }));
        assert!(!gate.is_open());
    }
}
