//! One-shot executor: runs a single command in a brand-new, non-persistent
//! shell process. Used when the platform or an explicit override disables
//! the persistent session path -- no cross-command state survives between
//! calls, by design.

use crate::config::{ShellConfig, ShellFamily};
use crate::error::ShellError;
use crate::marker::{scan_buffer, spawn_reader, ScanOutcome};
use crate::output::{OutputSink, SinkOptions};
use crate::script::{self, ScriptInput};
use crate::session::{ExecuteOptions, ExecuteResult};

use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::mpsc;

pub async fn execute(
    config: &ShellConfig,
    command: &str,
    options: ExecuteOptions,
) -> Result<ExecuteResult, ShellError> {
    if let Some(snapshot) = &config.snapshot_path {
        if !snapshot.exists() {
            return Err(ShellError::SnapshotNotFound(snapshot.clone()));
        }
    }

    // Best-effort family guess: a one-shot call may run on a platform (or
    // with an interpreter) the Command Script Builder can't positively
    // identify, in which case POSIX syntax is the closest approximation.
    let family = config.family().unwrap_or(ShellFamily::Posix);

    let nonce = uuid::Uuid::new_v4().simple().to_string();
    let marker = script::marker_for_nonce(&nonce);
    let sentinel = script::sentinel_for_marker(&marker);

    let mut full_command = String::new();
    if let Some(path) = &config.snapshot_path {
        full_command.push_str(&script::snapshot_source_command(family, path));
        full_command.push('\n');
    }
    full_command.push_str(command);

    let input = ScriptInput {
        cwd: options.cwd.as_deref(),
        env: &options.env,
        prefix: config.prefix.as_deref(),
        command: &full_command,
        marker: &marker,
    };
    let script_text = script::build_script(family, &input);

    let mut cmd = Command::new(&config.interpreter);
    cmd.args(&config.args)
        .arg("-c")
        .arg(&script_text)
        .stdin(Stdio::null())
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

    let mut child = cmd.spawn().map_err(ShellError::Io)?;
    let stdout = child.stdout.take().expect("stdout was piped");
    let stderr = child.stderr.take().expect("stderr was piped");

    let sink = OutputSink::new(SinkOptions {
        on_chunk: options.on_chunk.clone(),
        artifact_path: options.artifact_path.clone(),
        artifact_id: options.artifact_id.clone(),
        budget: None,
    })
    .await;

    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let _r_out = spawn_reader(stdout, tx.clone());
    let _r_err = spawn_reader(stderr, tx);

    let mut buffer = String::new();
    let mut cancelled = false;
    let mut annotation: Option<String> = None;
    let mut exit_code: Option<i32> = None;

    let scan_fut = async {
        while let Some(chunk) = rx.recv().await {
            buffer.push_str(&chunk);
            loop {
                match scan_buffer(&mut buffer, &sentinel, &sink).await {
                    ScanOutcome::Pending => break,
                    ScanOutcome::Resolved(code) => return Some(code),
                }
            }
        }
        None
    };

    let sleep = async {
        match options.timeout {
            Some(d) => tokio::time::sleep(d).await,
            None => std::future::pending::<()>().await,
        }
    };
    let cancel_wait = async {
        match &options.signal {
            Some(sig) => sig.cancelled().await,
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        result = scan_fut => {
            match result {
                Some(code) => exit_code = code,
                None => {
                    cancelled = true;
                    annotation = Some("Shell session terminated".to_string());
                }
            }
        }
        () = sleep => {
            cancelled = true;
            let secs = options.timeout.unwrap_or_default().as_secs();
            annotation = Some(format!("Command timed out after {secs} seconds"));
            let _ = child.start_kill();
        }
        () = cancel_wait => {
            cancelled = true;
            annotation = Some("Command was cancelled".to_string());
            let _ = child.start_kill();
        }
    }

    if cancelled {
        // The marker will never arrive now; drain whatever output had
        // already been produced before the kill took effect.
        while let Some(chunk) = rx.recv().await {
            buffer.push_str(&chunk);
        }
        if !buffer.is_empty() {
            sink.push(&buffer).await;
        }
        exit_code = None;
    }

    let _ = tokio::time::timeout(Duration::from_secs(5), child.wait()).await;

    let summary = sink.dump(annotation.as_deref()).await;
    Ok(ExecuteResult {
        output: summary.output,
        exit_code,
        cancelled,
        truncated: summary.truncated,
        total_lines: summary.total_lines,
        total_bytes: summary.total_bytes,
        output_lines: summary.output_lines,
        output_bytes: summary.output_bytes,
        artifact_id: summary.artifact_id,
    })
}

