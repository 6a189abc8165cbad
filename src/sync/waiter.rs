//! Countdown completion that tolerates racing signallers
//!
//! Like a wait group, with two differences:
//! - waiting before any `add` arms the waiter with a count of one, so a
//!   consumer can wait without knowing whether a producer will ever `add`;
//! - `done` is always safe: it only decrements a positive count, and once
//!   the count hits zero the waiter is finished for good and ignores
//!   further `add`/`done` calls.

use std::future::Future;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tokio::sync::watch;

#[derive(Debug, Default)]
struct State {
    count: usize,
    finished: bool,
}

/// One-shot completion signal with a countdown
#[derive(Debug)]
pub struct Waiter {
    state: Mutex<State>,
    cond: Condvar,
    finished_tx: watch::Sender<bool>,
}

impl Default for Waiter {
    fn default() -> Self {
        Self::new()
    }
}

impl Waiter {
    pub fn new() -> Self {
        let (finished_tx, _) = watch::channel(false);
        Self {
            state: Mutex::new(State::default()),
            cond: Condvar::new(),
            finished_tx,
        }
    }

    /// Raise the count; ignored once finished
    pub fn add(&self, n: usize) {
        let mut state = self.state.lock();
        if state.finished {
            return;
        }
        state.count += n;
    }

    /// Lower the count; reaching zero finishes the waiter
    pub fn done(&self) {
        {
            let mut state = self.state.lock();
            if state.finished || state.count == 0 {
                return;
            }
            state.count -= 1;
            if state.count > 0 {
                return;
            }
            state.finished = true;
        }

        self.cond.notify_all();
        self.finished_tx.send_replace(true);
        tracing::trace!("Waiter finished");
    }

    /// Block the current thread until finished
    pub fn wait(&self) {
        let mut state = self.state.lock();
        arm(&mut state);
        while !state.finished {
            self.cond.wait(&mut state);
        }
    }

    /// Block until finished or `timeout` passes; true when finished
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut state = self.state.lock();
        arm(&mut state);
        if !state.finished {
            self.cond.wait_while_for(&mut state, |s| !s.finished, timeout);
        }
        state.finished
    }

    /// Wait without blocking the executor
    pub async fn wait_async(&self) {
        if let Some(finished) = self.wait_chan() {
            finished.await;
        }
    }

    /// Completion as a future, for use in `select!`
    ///
    /// Returns `None` when the waiter has already finished.
    pub fn wait_chan(&self) -> Option<impl Future<Output = ()> + Send + 'static> {
        {
            let mut state = self.state.lock();
            if state.finished {
                return None;
            }
            arm(&mut state);
        }

        let mut finished = self.finished_tx.subscribe();
        Some(async move {
            let _ = finished.wait_for(|finished| *finished).await;
        })
    }

    pub fn is_finished(&self) -> bool {
        self.state.lock().finished
    }

    /// Outstanding count
    pub fn count(&self) -> usize {
        self.state.lock().count
    }
}

/// Implicit count of one for a wait with no prior `add`
fn arm(state: &mut State) {
    if !state.finished && state.count == 0 {
        state.count = 1;
    }
}
