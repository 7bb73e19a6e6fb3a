//! Output Sink: turns a stream of raw chunks into a line-aligned callback,
//! a bounded in-memory tail, an optional artifact mirror, and a final
//! summary.

use serde::Serialize;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Per-tool byte cap the rest of the agent stack uses for a single
/// command's returned output. The Sink's rolling budget is twice this, so
/// truncation only bites on genuinely large output.
pub const DEFAULT_MAX_BYTES: usize = 64 * 1024;

/// The bounded tail the Sink keeps in memory.
const DEFAULT_SINK_BUDGET: usize = DEFAULT_MAX_BYTES * 2;

/// Final product of an [`OutputSink`], returned by [`OutputSink::dump`].
#[derive(Debug, Clone, Serialize)]
pub struct OutputSummary {
    pub output: String,
    pub total_lines: u64,
    pub total_bytes: u64,
    pub output_lines: u64,
    pub output_bytes: u64,
    pub truncated: bool,
    pub artifact_id: Option<String>,
}

/// A line, retained verbatim including its trailing `\n` (the final line
/// of a command, or an appended annotation, may lack one).
struct RetainedLine {
    text: String,
}

struct SinkInner {
    retained: VecDeque<RetainedLine>,
    retained_bytes: usize,
    pending: String,
    total_bytes: u64,
    total_lines: u64,
    truncated: bool,
    budget: usize,
    artifact: Option<File>,
    artifact_id: Option<String>,
    artifact_warning: Option<String>,
    on_chunk: Option<Arc<dyn Fn(&str) + Send + Sync>>,
}

/// Streaming output accumulator, owned exclusively by one Running Command.
/// The session that feeds it only ever calls [`OutputSink::push`]; it never
/// reads back through the sink itself.
#[derive(Clone)]
pub struct OutputSink {
    inner: Arc<Mutex<SinkInner>>,
}

/// Construction options for a new [`OutputSink`].
#[derive(Default)]
pub struct SinkOptions {
    pub on_chunk: Option<Arc<dyn Fn(&str) + Send + Sync>>,
    pub artifact_path: Option<PathBuf>,
    pub artifact_id: Option<String>,
    pub budget: Option<usize>,
}

impl OutputSink {
    /// Create a new sink. If `artifact_path` is set, the file is opened
    /// eagerly (for-create, truncating); a failure to open it is itself a
    /// non-fatal artifact warning -- the sink falls back to memory-only.
    pub async fn new(options: SinkOptions) -> Self {
        let mut artifact = None;
        let mut artifact_warning = None;

        if let Some(path) = &options.artifact_path {
            match File::create(path).await {
                Ok(f) => artifact = Some(f),
                Err(e) => {
                    artifact_warning = Some(format!("failed to open artifact file: {e}"));
                    tracing::warn!(path = %path.display(), error = %e, "artifact open failed");
                }
            }
        }

        Self {
            inner: Arc::new(Mutex::new(SinkInner {
                retained: VecDeque::new(),
                retained_bytes: 0,
                pending: String::new(),
                total_bytes: 0,
                total_lines: 0,
                truncated: false,
                budget: options.budget.unwrap_or(DEFAULT_SINK_BUDGET),
                artifact,
                artifact_id: options.artifact_id,
                artifact_warning,
                on_chunk: options.on_chunk,
            })),
        }
    }

    /// Push a chunk of decoded text (not necessarily line-aligned). Safe
    /// to call concurrently; pushes are serialized internally so arrival
    /// order within and across calls is preserved.
    pub async fn push(&self, chunk: &str) {
        if chunk.is_empty() {
            return;
        }
        let mut inner = self.inner.lock().await;
        inner.total_bytes += chunk.len() as u64;
        inner.total_lines += chunk.matches('\n').count() as u64;

        if let Some(file) = inner.artifact.as_mut() {
            if let Err(e) = file.write_all(chunk.as_bytes()).await {
                inner.artifact_warning = Some(format!("artifact write failed: {e}"));
                tracing::warn!(error = %e, "artifact write failed, falling back to memory-only");
                inner.artifact = None;
            }
        }

        inner.pending.push_str(chunk);
        while let Some(pos) = inner.pending.find('\n') {
            let line: String = inner.pending.drain(..=pos).collect();
            Self::emit_line(&mut inner, line);
        }
    }

    /// Append a completed line to the retained tail, evicting from the
    /// front if the budget is exceeded, and fire the line callback.
    fn emit_line(inner: &mut SinkInner, line: String) {
        if let Some(cb) = &inner.on_chunk {
            cb(line.trim_end_matches('\n'));
        }
        inner.retained_bytes += line.len();
        inner.retained.push_back(RetainedLine { text: line });
        while inner.retained_bytes > inner.budget {
            if let Some(front) = inner.retained.pop_front() {
                inner.retained_bytes -= front.text.len();
                inner.truncated = true;
            } else {
                break;
            }
        }
    }

    /// Finalize: flush any pending partial line, append `annotation` as a
    /// trailing line if present, close the artifact, and return the
    /// summary. Idempotent in the sense that calling it twice is safe but
    /// only the first call observes a non-empty pending buffer.
    pub async fn dump(&self, annotation: Option<&str>) -> OutputSummary {
        let mut inner = self.inner.lock().await;

        if !inner.pending.is_empty() {
            let line = std::mem::take(&mut inner.pending);
            Self::emit_line(&mut inner, line);
        }

        if let Some(note) = annotation {
            let line = format!("{note}\n");
            inner.total_bytes += line.len() as u64;
            inner.total_lines += 1;
            Self::emit_line(&mut inner, line);
        }

        if let Some(mut file) = inner.artifact.take() {
            if let Err(e) = file.flush().await {
                inner.artifact_warning = Some(format!("artifact flush failed: {e}"));
                tracing::warn!(error = %e, "artifact flush failed");
            }
        }

        let output: String = inner.retained.iter().map(|l| l.text.as_str()).collect();
        let output_lines = inner
            .retained
            .iter()
            .map(|l| l.text.matches('\n').count() as u64)
            .sum();

        OutputSummary {
            output,
            total_lines: inner.total_lines,
            total_bytes: inner.total_bytes,
            output_lines,
            output_bytes: inner.retained_bytes as u64,
            truncated: inner.truncated,
            artifact_id: inner.artifact_id.clone(),
        }
    }

    /// The one-shot artifact warning, if any degradation occurred.
    pub async fn warning(&self) -> Option<String> {
        self.inner.lock().await.artifact_warning.clone()
    }
}
