//! Transcode job supervisor
//!
//! One task per stream name owns the transcoder process. Starting a job for
//! a name that already has one cancels the old task and waits until its
//! process is killed and reaped before the new process spawns.
//!
//! ```text
//! start("stream1") ──► remove old entry ──► cancel + await old task
//!                          │                      (kill, reap, cleanup)
//!                          ▼
//!                   write SDP, spawn, insert entry ──► supervise task
//!                                                        │
//!                         process exits / cancelled ◄────┘
//!                         under the lock: remove own entry (same generation
//!                         only), delete SDP unless a successor owns it
//!                         close forward consumer
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::BridgeError;
use crate::engine::Consumer;
use crate::stats::BridgeStats;

/// File written before the process starts and removed after it exits
#[derive(Debug, Clone)]
pub struct JobFile {
    /// Destination path
    pub path: PathBuf,
    /// File contents
    pub contents: String,
}

/// A transcoder process to run under a stream name
pub struct TranscodeJob {
    /// Stream name the job is keyed by
    pub stream_name: String,
    /// Process to spawn
    pub command: Command,
    /// Input description for the process
    pub input: Option<JobFile>,
    /// Engine consumer feeding the process, closed when the job ends
    pub forward: Option<Arc<dyn Consumer>>,
}

struct JobEntry {
    generation: u64,
    pid: Option<u32>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Keeps at most one transcoder running per stream name
#[derive(Clone)]
pub struct TranscodeSupervisor {
    jobs: Arc<Mutex<HashMap<String, JobEntry>>>,
    next_generation: Arc<AtomicU64>,
    shutdown: CancellationToken,
    stats: Arc<BridgeStats>,
}

impl TranscodeSupervisor {
    /// Create a supervisor reporting into the given counters
    pub fn new(stats: Arc<BridgeStats>) -> Self {
        Self {
            jobs: Arc::new(Mutex::new(HashMap::new())),
            next_generation: Arc::new(AtomicU64::new(0)),
            shutdown: CancellationToken::new(),
            stats,
        }
    }

    /// Start a job, replacing any job running under the same name
    ///
    /// Returns the new process id. If spawning fails, the previous job (if
    /// any) has still been stopped and the forward consumer is closed.
    pub async fn start(&self, job: TranscodeJob) -> Result<Option<u32>, BridgeError> {
        let TranscodeJob {
            stream_name,
            mut command,
            input,
            forward,
        } = job;

        loop {
            let previous = {
                let mut jobs = self.jobs.lock().await;

                if self.shutdown.is_cancelled() {
                    drop(jobs);
                    close_forward(&stream_name, forward.as_deref());
                    return Err(BridgeError::ShutDown);
                }

                match jobs.remove(&stream_name) {
                    Some(previous) => previous,
                    None => {
                        let spawned = spawn_with_input(&mut command, input.as_ref()).await;
                        let child = match spawned {
                            Ok(child) => child,
                            Err(e) => {
                                drop(jobs);
                                close_forward(&stream_name, forward.as_deref());
                                if let Some(file) = &input {
                                    remove_input(&stream_name, &file.path).await;
                                }
                                return Err(e);
                            }
                        };

                        let pid = child.id();
                        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
                        let cancel = CancellationToken::new();
                        let task = tokio::spawn(supervise(
                            Arc::clone(&self.jobs),
                            Arc::clone(&self.stats),
                            stream_name.clone(),
                            generation,
                            child,
                            cancel.clone(),
                            input.map(|f| f.path),
                            forward,
                        ));

                        let _ = jobs.insert(
                            stream_name.clone(),
                            JobEntry {
                                generation,
                                pid,
                                cancel,
                                task,
                            },
                        );
                        self.stats.record_job_started();

                        tracing::info!(stream = %stream_name, pid = ?pid, "Transcoder started");
                        return Ok(pid);
                    }
                }
            };

            tracing::info!(
                stream = %stream_name,
                pid = ?previous.pid,
                "Replacing running transcoder"
            );
            stop_entry(previous).await;
        }
    }

    /// Stop the job under a name, waiting for its teardown
    ///
    /// Returns `false` if no job was running.
    pub async fn stop(&self, stream_name: &str) -> bool {
        let entry = self.jobs.lock().await.remove(stream_name);
        match entry {
            Some(entry) => {
                stop_entry(entry).await;
                true
            }
            None => false,
        }
    }

    /// Whether a job is running under the name
    pub async fn is_running(&self, stream_name: &str) -> bool {
        self.jobs.lock().await.contains_key(stream_name)
    }

    /// Process id of the job under the name
    pub async fn pid(&self, stream_name: &str) -> Option<u32> {
        self.jobs.lock().await.get(stream_name).and_then(|e| e.pid)
    }

    /// Number of running jobs
    pub async fn job_count(&self) -> usize {
        self.jobs.lock().await.len()
    }

    /// Stop every job and refuse new ones
    pub async fn shutdown(&self) {
        let entries: Vec<(String, JobEntry)> = {
            let mut jobs = self.jobs.lock().await;
            self.shutdown.cancel();
            jobs.drain().collect()
        };

        if !entries.is_empty() {
            tracing::info!(jobs = entries.len(), "Stopping transcoders");
        }

        for (_, entry) in entries {
            stop_entry(entry).await;
        }
    }
}

async fn stop_entry(entry: JobEntry) {
    entry.cancel.cancel();
    if let Err(e) = entry.task.await {
        tracing::warn!(error = %e, "Transcoder task panicked");
    }
}

async fn spawn_with_input(command: &mut Command, input: Option<&JobFile>) -> Result<Child, BridgeError> {
    if let Some(file) = input {
        tokio::fs::write(&file.path, &file.contents)
            .await
            .map_err(|source| BridgeError::Description {
                path: file.path.clone(),
                source,
            })?;
    }
    command.spawn().map_err(BridgeError::Spawn)
}

async fn remove_input(stream_name: &str, path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::debug!(stream = %stream_name, error = %e, "Failed to remove input file");
        }
    }
}

fn close_forward(stream_name: &str, forward: Option<&dyn Consumer>) {
    if let Some(consumer) = forward {
        if let Err(e) = consumer.close() {
            tracing::debug!(stream = %stream_name, error = %e, "Failed to close forward consumer");
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn supervise(
    jobs: Arc<Mutex<HashMap<String, JobEntry>>>,
    stats: Arc<BridgeStats>,
    stream_name: String,
    generation: u64,
    mut child: Child,
    cancel: CancellationToken,
    input_path: Option<PathBuf>,
    forward: Option<Arc<dyn Consumer>>,
) {
    if let Some(stdout) = child.stdout.take() {
        let _ = tokio::spawn(log_lines(stream_name.clone(), "stdout", stdout));
    }
    if let Some(stderr) = child.stderr.take() {
        let _ = tokio::spawn(log_lines(stream_name.clone(), "stderr", stderr));
    }

    tokio::select! {
        status = child.wait() => match status {
            Ok(status) if status.success() => {
                tracing::info!(stream = %stream_name, "Transcoder exited");
            }
            Ok(status) => {
                tracing::warn!(stream = %stream_name, status = %status, "Transcoder exited with failure");
            }
            Err(e) => {
                tracing::error!(stream = %stream_name, error = %e, "Failed to wait for transcoder");
            }
        },
        () = cancel.cancelled() => {
            // Kills and reaps
            if let Err(e) = child.kill().await {
                tracing::warn!(stream = %stream_name, error = %e, "Failed to kill transcoder");
            }
            tracing::info!(stream = %stream_name, "Transcoder stopped");
        }
    }

    {
        // The input is removed under the lock: a successor writes its own
        // input under the same lock, and a registered successor owns the file.
        let mut jobs = jobs.lock().await;
        let successor = match jobs.get(&stream_name).map(|e| e.generation) {
            Some(current) if current == generation => {
                let _ = jobs.remove(&stream_name);
                false
            }
            Some(_) => true,
            None => false,
        };
        if let (Some(path), false) = (&input_path, successor) {
            remove_input(&stream_name, path).await;
        }
    }

    close_forward(&stream_name, forward.as_deref());
    stats.record_job_exited();
}

async fn log_lines(stream_name: String, source: &'static str, reader: impl AsyncRead + Unpin) {
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                tracing::trace!(stream = %stream_name, source = source, "{}", line);
            }
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(stream = %stream_name, source = source, error = %e, "Transcoder output closed");
                break;
            }
        }
    }
}
