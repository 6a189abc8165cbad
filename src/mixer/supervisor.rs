//! Engine run supervision
//!
//! ```text
//!            topology ≥2                launch ok
//!   Idle ──────────────────► Starting ─────────────► Running
//!    ▲                          │ launch err            │  │
//!    └──────────────────────────┘                       │  │ unexpected exit
//!    ▲                                                  │  ▼
//!    │         topology <2 / close                      │ Restarting ──backoff──► Starting
//!    └──────────────── Stopping ◄───────────────────────┘
//! ```
//!
//! Every run carries a generation number. An exit is only treated as a
//! crash when it belongs to the current run; exits caused by a stop or a
//! topology-driven restart arrive for a stale generation and are ignored.

use std::fmt;
use std::sync::{Arc, Weak};

use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::engine::{wait_exit, EngineExit, EngineHandle};
use super::rtp_mixer::RtpMixer;

/// Mixing engine lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineState {
    /// No engine; one parent is passed through directly
    #[default]
    Idle,
    /// Allocating ports and launching
    Starting,
    /// Engine running, parents are mixed
    Running,
    /// Engine crashed, waiting out the backoff
    Restarting,
    /// Engine being killed
    Stopping,
}

impl EngineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineState::Idle => "idle",
            EngineState::Starting => "starting",
            EngineState::Running => "running",
            EngineState::Restarting => "restarting",
            EngineState::Stopping => "stopping",
        }
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resources of one engine run
pub(super) struct EngineRun {
    pub(super) generation: u64,
    pub(super) handle: EngineHandle,
    /// Sends to the engine's inputs, receives its output
    pub(super) socket: Arc<UdpSocket>,
    /// Reader, keepalive and monitor tasks
    pub(super) tasks: Vec<JoinHandle<()>>,
}

impl EngineRun {
    pub(super) fn abort_tasks(&self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Wait for a run to end and report it to the mixer
///
/// Handling happens on a separate task: the monitor itself is aborted when
/// the run is torn down.
pub(super) fn spawn_monitor(
    mixer: Weak<RtpMixer>,
    generation: u64,
    mut exit: watch::Receiver<Option<EngineExit>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let status = wait_exit(&mut exit).await;
        let Some(mixer) = mixer.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            mixer.handle_engine_exit(generation, status).await;
        });
    })
}

impl RtpMixer {
    /// React to a run ending on its own
    pub(super) async fn handle_engine_exit(self: Arc<Self>, generation: u64, status: EngineExit) {
        {
            let _topology = self.topology.lock().await;
            let Some(run) = self.take_run_if_current(generation) else {
                tracing::trace!(mixer = %self.node().id(), generation, "Stale engine exit ignored");
                return;
            };
            run.abort_tasks();

            tracing::warn!(
                mixer = %self.node().id(),
                generation,
                exit = ?status,
                delay_ms = self.config.restart_delay.as_millis() as u64,
                "Engine exited unexpectedly, restarting after backoff"
            );
        }

        tokio::time::sleep(self.config.restart_delay).await;

        let _topology = self.topology.lock().await;
        if !self.backoff_still_pending(generation) {
            return;
        }

        if self.active_parents().len() < 2 {
            self.set_engine_state(EngineState::Idle);
            tracing::debug!(mixer = %self.node().id(), "Engine no longer needed after backoff");
            return;
        }

        if let Err(e) = self.start_engine().await {
            tracing::error!(mixer = %self.node().id(), error = %e, "Engine restart failed, giving up");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_display() {
        assert_eq!(EngineState::default(), EngineState::Idle);
        assert_eq!(EngineState::Running.to_string(), "running");
        assert_eq!(EngineState::Restarting.as_str(), "restarting");
    }
}
