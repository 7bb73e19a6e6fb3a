//! The persistent Shell Session: one long-lived child shell process reused
//! across many logically independent commands, with completion detected by
//! watching for a one-time marker line rather than by process exit.

use crate::cancel::CancelHandle;
use crate::config::{ShellConfig, ShellFamily};
use crate::error::ShellError;
use crate::marker::{scan_buffer, spawn_reader, ScanOutcome};
use crate::output::{OutputSink, OutputSummary, SinkOptions};
use crate::script::{self, ScriptInput};

use serde::Serialize;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{mpsc, oneshot, Mutex, Notify};
use tokio::task::JoinHandle;

/// Grace period after SIGINT before the session force-kills the child.
pub const ABORT_GRACE: Duration = Duration::from_millis(1500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AbortReason {
    Timeout,
    Signal,
}

impl AbortReason {
    /// `timeout` is `Some` only for [`AbortReason::Timeout`]; it drives the
    /// literal "Command timed out after N seconds" annotation text.
    fn annotation(self, timeout: Option<Duration>) -> String {
        match self {
            Self::Timeout => {
                let secs = timeout.unwrap_or_default().as_secs();
                format!("Command timed out after {secs} seconds")
            }
            Self::Signal => "Command was cancelled".to_string(),
        }
    }
}

/// Per-call knobs for [`ShellSession::execute`] and [`crate::execute_bash`].
#[derive(Clone, Default)]
pub struct ExecuteOptions {
    pub cwd: Option<PathBuf>,
    pub timeout: Option<Duration>,
    pub env: Vec<(String, Option<String>)>,
    pub on_chunk: Option<Arc<dyn Fn(&str) + Send + Sync>>,
    pub artifact_path: Option<PathBuf>,
    pub artifact_id: Option<String>,
    pub signal: Option<CancelHandle>,
}

impl std::fmt::Debug for ExecuteOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecuteOptions")
            .field("cwd", &self.cwd)
            .field("timeout", &self.timeout)
            .field("env", &self.env)
            .field("on_chunk", &self.on_chunk.is_some())
            .field("artifact_path", &self.artifact_path)
            .field("artifact_id", &self.artifact_id)
            .field("signal", &self.signal.is_some())
            .finish()
    }
}

/// What one [`ShellSession::execute`] (or one-shot run) produces.
#[derive(Debug, Clone, Serialize)]
pub struct ExecuteResult {
    pub output: String,
    /// `None` means the exit code is unknown -- the command was cancelled,
    /// or the shell died before the marker confirmed a status.
    pub exit_code: Option<i32>,
    pub cancelled: bool,
    pub truncated: bool,
    pub total_lines: u64,
    pub total_bytes: u64,
    pub output_lines: u64,
    pub output_bytes: u64,
    pub artifact_id: Option<String>,
}

impl ExecuteResult {
    fn from_summary(summary: OutputSummary, exit_code: Option<i32>, cancelled: bool) -> Self {
        Self {
            output: summary.output,
            exit_code,
            cancelled,
            truncated: summary.truncated,
            total_lines: summary.total_lines,
            total_bytes: summary.total_bytes,
            output_lines: summary.output_lines,
            output_bytes: summary.output_bytes,
            artifact_id: summary.artifact_id,
        }
    }
}

struct ResolvedCommand {
    exit_code: Option<i32>,
    cancelled: bool,
    annotation: Option<String>,
}

/// The single in-flight command a session may have at any moment.
struct RunningCommand {
    sentinel: String,
    sink: OutputSink,
    cancelled: AtomicBool,
    annotation: Mutex<Option<String>>,
    completed: AtomicBool,
    result_tx: Mutex<Option<oneshot::Sender<ResolvedCommand>>>,
    done: Notify,
}

impl RunningCommand {
    fn new(marker: &str, sink: OutputSink) -> (Arc<Self>, oneshot::Receiver<ResolvedCommand>) {
        let (tx, rx) = oneshot::channel();
        let rc = Arc::new(Self {
            sentinel: script::sentinel_for_marker(marker),
            sink,
            cancelled: AtomicBool::new(false),
            annotation: Mutex::new(None),
            completed: AtomicBool::new(false),
            result_tx: Mutex::new(Some(tx)),
            done: Notify::new(),
        });
        (rc, rx)
    }

    async fn mark_cancelled(&self, note: &str) {
        self.cancelled.store(true, Ordering::SeqCst);
        let mut guard = self.annotation.lock().await;
        if guard.is_none() {
            *guard = Some(note.to_string());
        }
    }

    /// Resolve with `exit_code` (ignored if this command was cancelled --
    /// cancellation always reports an unknown exit code even if the marker
    /// carried a real one). Idempotent: only the first caller wins, and
    /// its return value reports whether this call was that winner.
    async fn resolve(&self, mut exit_code: Option<i32>) -> bool {
        if self.completed.swap(true, Ordering::SeqCst) {
            return false;
        }
        let cancelled = self.cancelled.load(Ordering::SeqCst);
        if cancelled {
            exit_code = None;
        }
        let annotation = self.annotation.lock().await.clone();
        if let Some(tx) = self.result_tx.lock().await.take() {
            let _ = tx.send(ResolvedCommand {
                exit_code,
                cancelled,
                annotation,
            });
        }
        self.done.notify_one();
        true
    }
}

struct SessionState {
    fingerprint: String,
    family: ShellFamily,
    prefix: Option<String>,
    pid: i32,
    stdin: Mutex<ChildStdin>,
    serialize: Mutex<()>,
    current: Mutex<Option<Arc<RunningCommand>>>,
    scan_buffer: Mutex<String>,
    closed: AtomicBool,
    exit_watcher: Mutex<Option<JoinHandle<()>>>,
    background: Mutex<Vec<JoinHandle<()>>>,
}

/// A persistent shell session. Cheap to clone -- every clone shares the
/// same underlying child process and state.
#[derive(Clone)]
pub struct ShellSession(Arc<SessionState>);

impl ShellSession {
    /// Spawn the child shell, wire up its reader/pump/exit-watcher tasks,
    /// and (if a snapshot was configured) source it before returning.
    pub async fn start(config: &ShellConfig) -> Result<Self, ShellError> {
        let fingerprint = config.fingerprint();
        let family = config.family().unwrap_or(ShellFamily::Posix);

        if let Some(snapshot) = &config.snapshot_path {
            if !snapshot.exists() {
                return Err(ShellError::SnapshotNotFound(snapshot.clone()));
            }
        }

        // A snapshot already replicates the interactive environment; passing
        // the login flag on top of it would re-source the real rc files and
        // defeat the snapshot.
        let mut launch_args = config.args.clone();
        if !config.no_login && config.snapshot_path.is_none() {
            if let Some(flag) = family.login_flag() {
                launch_args.push(flag.to_string());
            }
        }

        let mut cmd = Command::new(&config.interpreter);
        cmd.args(&launch_args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        for (key, value) in &config.env {
            match value {
                Some(v) => {
                    cmd.env(key, v);
                }
                None => {
                    cmd.env_remove(key);
                }
            }
        }

        // Fresh process group so an abort's SIGINT reaches every child the
        // command itself may have spawned, not just the shell.
        unsafe {
            cmd.pre_exec(|| {
                nix::unistd::setsid().map_err(|e| std::io::Error::from_raw_os_error(e as i32))?;
                Ok(())
            });
        }

        let mut child: Child = cmd.spawn().map_err(|e| ShellError::StartupFailed {
            fingerprint: fingerprint.clone(),
            reason: e.to_string(),
        })?;

        let pid = child.id().ok_or_else(|| ShellError::StartupFailed {
            fingerprint: fingerprint.clone(),
            reason: "child exited immediately after spawn".to_string(),
        })? as i32;

        let stdin = child.stdin.take().ok_or_else(|| ShellError::StdinUnavailable {
            fingerprint: fingerprint.clone(),
        })?;
        let stdout = child.stdout.take().expect("stdout was piped");
        let stderr = child.stderr.take().expect("stderr was piped");

        let state = Arc::new(SessionState {
            fingerprint: fingerprint.clone(),
            family,
            prefix: config.prefix.clone(),
            pid,
            stdin: Mutex::new(stdin),
            serialize: Mutex::new(()),
            current: Mutex::new(None),
            scan_buffer: Mutex::new(String::new()),
            closed: AtomicBool::new(false),
            exit_watcher: Mutex::new(None),
            background: Mutex::new(Vec::new()),
        });
        let session = Self(state);

        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let r_out = spawn_reader(stdout, tx.clone());
        let r_err = spawn_reader(stderr, tx);

        let pump_session = session.clone();
        let pump = tokio::spawn(async move {
            while let Some(chunk) = rx.recv().await {
                let rc = pump_session.0.current.lock().await.clone();
                let Some(rc) = rc else { continue };

                let mut buf = pump_session.0.scan_buffer.lock().await;
                buf.push_str(&chunk);
                loop {
                    match scan_buffer(&mut buf, &rc.sentinel, &rc.sink).await {
                        ScanOutcome::Pending => break,
                        ScanOutcome::Resolved(code) => {
                            if rc.resolve(code).await {
                                drop(buf);
                                pump_session.finish_current().await;
                            }
                            break;
                        }
                    }
                }
            }
        });

        let exit_session = session.clone();
        let exit_watcher = tokio::spawn(async move {
            let status = child.wait().await;
            exit_session.0.closed.store(true, Ordering::SeqCst);
            tracing::info!(
                fingerprint = %exit_session.0.fingerprint,
                exit_status = ?status,
                "shell session exited"
            );
            if let Some(rc) = exit_session.0.current.lock().await.clone() {
                rc.mark_cancelled("Shell session terminated").await;
                if rc.resolve(None).await {
                    exit_session.finish_current().await;
                }
            }
        });

        *session.0.exit_watcher.lock().await = Some(exit_watcher);
        *session.0.background.lock().await = vec![r_out, r_err, pump];

        if let Some(path) = &config.snapshot_path {
            let source_cmd = script::snapshot_source_command(family, path);
            session
                .execute(&source_cmd, ExecuteOptions::default())
                .await
                .map_err(|e| ShellError::StartupFailed {
                    fingerprint: fingerprint.clone(),
                    reason: format!("failed to source snapshot: {e}"),
                })?;
        }

        tracing::info!(
            fingerprint = %session.0.fingerprint,
            family = ?family,
            pid,
            "shell session created"
        );

        Ok(session)
    }

    /// The child shell's process id. Exposed `pub(crate)` for diagnostics
    /// and tests that need to distinguish one spawned session from another
    /// sharing the same fingerprint.
    #[must_use]
    pub(crate) fn pid(&self) -> i32 {
        self.0.pid
    }

    #[must_use]
    pub fn fingerprint(&self) -> &str {
        &self.0.fingerprint
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.0.closed.load(Ordering::SeqCst)
    }

    /// Run one command to completion. At most one command runs at a time
    /// per session; concurrent callers queue on the internal serialization
    /// lock in call order.
    pub async fn execute(
        &self,
        command: &str,
        options: ExecuteOptions,
    ) -> Result<ExecuteResult, ShellError> {
        let _guard = self.0.serialize.lock().await;

        if self.0.closed.load(Ordering::SeqCst) {
            return Err(ShellError::SessionClosed {
                fingerprint: self.0.fingerprint.clone(),
            });
        }

        // Drop any residue left behind by a prior command's abort.
        self.0.scan_buffer.lock().await.clear();

        let nonce = uuid::Uuid::new_v4().simple().to_string();
        let marker = script::marker_for_nonce(&nonce);

        let sink = OutputSink::new(SinkOptions {
            on_chunk: options.on_chunk.clone(),
            artifact_path: options.artifact_path.clone(),
            artifact_id: options.artifact_id.clone(),
            budget: None,
        })
        .await;

        let (rc, result_rx) = RunningCommand::new(&marker, sink.clone());
        *self.0.current.lock().await = Some(rc.clone());

        let input = ScriptInput {
            cwd: options.cwd.as_deref(),
            env: &options.env,
            prefix: self.0.prefix.as_deref(),
            command,
            marker: &marker,
        };
        let script_text = script::build_script(self.0.family, &input);

        let abort_task = self.spawn_abort_watch(rc.clone(), options.timeout, options.signal.clone());

        {
            let mut stdin = self.0.stdin.lock().await;
            if let Err(e) = stdin.write_all(script_text.as_bytes()).await {
                self.dispose().await;
                return Err(ShellError::WriteFailed {
                    fingerprint: self.0.fingerprint.clone(),
                    source: e,
                });
            }
            if let Err(e) = stdin.flush().await {
                self.dispose().await;
                return Err(ShellError::WriteFailed {
                    fingerprint: self.0.fingerprint.clone(),
                    source: e,
                });
            }
        }

        let resolved = match result_rx.await {
            Ok(r) => r,
            Err(_) => ResolvedCommand {
                exit_code: None,
                cancelled: true,
                annotation: Some("Shell session terminated".to_string()),
            },
        };

        if let Some(handle) = abort_task {
            handle.abort();
        }

        let summary = sink.dump(resolved.annotation.as_deref()).await;
        Ok(ExecuteResult::from_summary(
            summary,
            resolved.exit_code,
            resolved.cancelled,
        ))
    }

    fn spawn_abort_watch(
        &self,
        rc: Arc<RunningCommand>,
        timeout: Option<Duration>,
        signal: Option<CancelHandle>,
    ) -> Option<JoinHandle<()>> {
        if timeout.is_none() && signal.is_none() {
            return None;
        }
        let session = self.clone();
        Some(tokio::spawn(async move {
            let reason = match (timeout, signal) {
                (Some(d), Some(sig)) => {
                    tokio::select! {
                        () = tokio::time::sleep(d) => AbortReason::Timeout,
                        () = sig.cancelled() => AbortReason::Signal,
                    }
                }
                (Some(d), None) => {
                    tokio::time::sleep(d).await;
                    AbortReason::Timeout
                }
                (None, Some(sig)) => {
                    sig.cancelled().await;
                    AbortReason::Signal
                }
                (None, None) => return,
            };
            session.run_abort(rc, reason, timeout).await;
        }))
    }

    async fn run_abort(&self, rc: Arc<RunningCommand>, reason: AbortReason, timeout: Option<Duration>) {
        rc.mark_cancelled(&reason.annotation(timeout)).await;
        self.send_signal(nix::sys::signal::Signal::SIGINT);

        let grace = tokio::time::timeout(ABORT_GRACE, rc.done.notified()).await;
        if grace.is_err() {
            tracing::warn!(
                fingerprint = %self.0.fingerprint,
                "abort grace period elapsed, force-killing shell"
            );
            self.send_signal(nix::sys::signal::Signal::SIGKILL);
            if rc.resolve(None).await {
                self.finish_current().await;
            }
        }
    }

    fn send_signal(&self, signal: nix::sys::signal::Signal) {
        use nix::sys::signal::kill;
        use nix::unistd::Pid;
        if let Err(e) = kill(Pid::from_raw(-self.0.pid), signal) {
            tracing::debug!(fingerprint = %self.0.fingerprint, pid = self.0.pid, error = %e, "signal delivery failed");
        }
    }

    async fn finish_current(&self) {
        *self.0.current.lock().await = None;
    }

    /// Tear the session down: signal the process group, resolve any
    /// in-flight command as cancelled, and detach the background tasks.
    pub async fn dispose(&self) {
        if self.0.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!(fingerprint = %self.0.fingerprint, "shell session disposed");
        self.send_signal(nix::sys::signal::Signal::SIGKILL);

        if let Some(rc) = self.0.current.lock().await.take() {
            rc.mark_cancelled("Shell session terminated").await;
            rc.resolve(None).await;
        }

        if let Some(handle) = self.0.exit_watcher.lock().await.take() {
            let _ = tokio::time::timeout(Duration::from_secs(2), handle).await;
        }
        for handle in self.0.background.lock().await.drain(..) {
            handle.abort();
        }
    }
}
