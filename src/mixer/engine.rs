//! Mixing engine process boundary
//!
//! The mixer never talks to a process directly. It hands an [`EngineJob`]
//! to an [`EngineLauncher`] and gets back an [`EngineHandle`] it can kill
//! and wait on. [`FfmpegLauncher`] is the production launcher; tests plug in
//! their own.

use std::net::IpAddr;
use std::process::Stdio;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::{oneshot, watch};

use crate::core::codec::{ffmpeg_codec_name, CODEC_ELD, CODEC_G722};
use crate::core::Codec;
use crate::error::{Error, Result};

/// Sample rate assumed when the codec does not state one
pub const DEFAULT_SAMPLE_RATE: u32 = 8000;

/// Everything needed to start one engine run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineJob {
    /// Session description fed on stdin
    pub sdp: String,
    /// Number of parallel inputs
    pub inputs: usize,
    pub sample_rate: u32,
    /// Encoder name for the mixed output
    pub output_codec: String,
    pub output_host: IpAddr,
    pub output_port: u16,
}

impl EngineJob {
    pub fn new(codec: &Codec, sdp: String, inputs: usize, output_host: IpAddr, output_port: u16) -> Self {
        let sample_rate = match codec.clock_rate {
            0 => DEFAULT_SAMPLE_RATE,
            rate => rate,
        };
        Self {
            sdp,
            inputs,
            sample_rate,
            output_codec: output_codec_name(&codec.name).to_string(),
            output_host,
            output_port,
        }
    }

    /// Command line arguments for ffmpeg
    pub fn ffmpeg_args(&self) -> Vec<String> {
        let mut args: Vec<String> = [
            "-hide_banner",
            "-protocol_whitelist",
            "pipe,rtp,udp,file,crypto",
            "-listen_timeout",
            "1",
            "-f",
            "sdp",
            "-i",
            "pipe:0",
            "-filter_complex",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        args.push(format!(
            "amix=inputs={}:duration=longest:dropout_transition=0",
            self.inputs
        ));
        args.extend([
            "-ar".to_string(),
            self.sample_rate.to_string(),
            "-c:a".to_string(),
            self.output_codec.clone(),
            "-f".to_string(),
            "rtp".to_string(),
            format!("rtp://{}:{}", self.output_host, self.output_port),
        ]);
        args
    }
}

/// Encoder the engine should produce for a codec
pub fn output_codec_name(name: &str) -> &str {
    match name {
        CODEC_ELD => "libfdk_aac",
        CODEC_G722 => "pcm_s16le",
        other => ffmpeg_codec_name(other),
    }
}

/// How an engine run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineExit {
    /// Process exited on its own with this code (`None` if signalled)
    Exited(Option<i32>),
    /// Killed on request
    Killed,
    /// Waiting on the process failed
    Failed(String),
    /// The launcher went away without reporting
    Lost,
}

/// Mixer-side handle to a running engine
#[derive(Debug)]
pub struct EngineHandle {
    kill: Option<oneshot::Sender<()>>,
    exit: watch::Receiver<Option<EngineExit>>,
}

/// Launcher-side counterpart of an [`EngineHandle`]
#[derive(Debug)]
pub struct EngineControl {
    kill: oneshot::Receiver<()>,
    exit: watch::Sender<Option<EngineExit>>,
}

impl EngineHandle {
    /// Create a connected handle/control pair
    pub fn pair() -> (EngineHandle, EngineControl) {
        let (kill_tx, kill_rx) = oneshot::channel();
        let (exit_tx, exit_rx) = watch::channel(None);
        (
            EngineHandle {
                kill: Some(kill_tx),
                exit: exit_rx,
            },
            EngineControl {
                kill: kill_rx,
                exit: exit_tx,
            },
        )
    }

    /// Ask the launcher to kill the process; repeated calls do nothing
    pub fn kill(&mut self) {
        if let Some(kill) = self.kill.take() {
            let _ = kill.send(());
        }
    }

    /// Exit status, if the run has ended
    pub fn exit_status(&self) -> Option<EngineExit> {
        self.exit.borrow().clone()
    }

    /// Receiver that observes the exit status
    pub fn subscribe(&self) -> watch::Receiver<Option<EngineExit>> {
        self.exit.clone()
    }

    /// Wait for the run to end
    pub async fn wait(&mut self) -> EngineExit {
        wait_exit(&mut self.exit).await
    }
}

/// Wait on an exit watch until the run ends
pub async fn wait_exit(exit: &mut watch::Receiver<Option<EngineExit>>) -> EngineExit {
    match exit.wait_for(Option::is_some).await {
        Ok(status) => status.clone().unwrap_or(EngineExit::Lost),
        Err(_) => EngineExit::Lost,
    }
}

impl EngineControl {
    /// Resolves once the mixer asks for a kill or drops its handle
    pub async fn killed(&mut self) {
        let _ = (&mut self.kill).await;
    }

    /// Publish how the run ended
    pub fn report(&self, exit: EngineExit) {
        self.exit.send_replace(Some(exit));
    }
}

/// Starts mixing engine runs
pub trait EngineLauncher: Send + Sync {
    /// Start one run; must not block
    fn launch(&self, job: &EngineJob) -> Result<EngineHandle>;
}

/// Launches ffmpeg as a child process
#[derive(Debug, Clone)]
pub struct FfmpegLauncher {
    binary: String,
}

impl FfmpegLauncher {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }
}

impl Default for FfmpegLauncher {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

impl EngineLauncher for FfmpegLauncher {
    fn launch(&self, job: &EngineJob) -> Result<EngineHandle> {
        let mut child = Command::new(&self.binary)
            .args(job.ffmpeg_args())
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::EngineSpawn(e.to_string()))?;

        let pid = child.id();
        let stdin = child.stdin.take();
        let sdp = job.sdp.clone();
        let (handle, mut control) = EngineHandle::pair();

        tokio::spawn(async move {
            if let Some(mut stdin) = stdin {
                if let Err(e) = stdin.write_all(sdp.as_bytes()).await {
                    tracing::warn!(pid = ?pid, error = %e, "Failed to write SDP to engine");
                }
            }

            let status = tokio::select! {
                _ = control.killed() => None,
                status = child.wait() => Some(status),
            };

            let exit = match status {
                None => {
                    let _ = child.kill().await;
                    EngineExit::Killed
                }
                Some(Ok(status)) => EngineExit::Exited(status.code()),
                Some(Err(e)) => EngineExit::Failed(e.to_string()),
            };

            tracing::debug!(pid = ?pid, exit = ?exit, "Engine process ended");
            control.report(exit);
        });

        tracing::info!(
            binary = %self.binary,
            pid = ?pid,
            inputs = job.inputs,
            output_port = job.output_port,
            "Engine process started"
        );

        Ok(handle)
    }
}
