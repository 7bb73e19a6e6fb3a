//! Shared marker-scanning and UTF-8 streaming helpers used by both the
//! persistent session's output pump and the one-shot executor, so the two
//! paths can never drift out of sync on how a completion line is detected.

use crate::output::OutputSink;
use crate::script::MARKER_TAIL;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Incremental UTF-8 decoder that carries an incomplete trailing byte
/// sequence across calls and drops a leading BOM exactly once.
pub(crate) struct Utf8Streamer {
    carry: Vec<u8>,
    bom_checked: bool,
}

impl Utf8Streamer {
    pub(crate) fn new() -> Self {
        Self {
            carry: Vec::new(),
            bom_checked: false,
        }
    }

    /// Feed raw bytes in, get back whatever text is now known to be valid.
    /// Bytes that don't yet form a complete UTF-8 sequence are held for the
    /// next call.
    pub(crate) fn feed(&mut self, bytes: &[u8]) -> String {
        self.carry.extend_from_slice(bytes);

        if !self.bom_checked {
            self.bom_checked = true;
            if self.carry.starts_with(&[0xEF, 0xBB, 0xBF]) {
                self.carry.drain(..3);
            }
        }

        match std::str::from_utf8(&self.carry) {
            Ok(s) => {
                let out = s.to_string();
                self.carry.clear();
                out
            }
            Err(e) => {
                let valid_len = e.valid_up_to();
                // Safe: [..valid_len] is exactly the prefix from_utf8 validated.
                let out = std::str::from_utf8(&self.carry[..valid_len])
                    .unwrap_or_default()
                    .to_string();
                self.carry.drain(..valid_len);
                // A genuinely malformed byte (not just a truncated multi-byte
                // sequence waiting on more input) can never become valid --
                // drop it rather than stalling forever.
                if self.carry.len() > 4 {
                    self.carry.clear();
                }
                out
            }
        }
    }
}

/// Spawn a task that reads `reader` to EOF in 8 KiB chunks, UTF-8-decodes
/// with carry, and forwards each non-empty decoded chunk over `tx`.
pub(crate) fn spawn_reader<R>(mut reader: R, tx: mpsc::UnboundedSender<String>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut streamer = Utf8Streamer::new();
        let mut buf = [0u8; 8192];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    let text = streamer.feed(&buf[..n]);
                    if !text.is_empty() && tx.send(text).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    })
}

/// Result of one scan pass over the buffer.
pub(crate) enum ScanOutcome {
    /// No complete marker yet; caller should wait for more input.
    Pending,
    /// The marker was found and fully consumed; `buffer` has been reset.
    Resolved(Option<i32>),
}

/// Search `buffer` for `sentinel`. If found and its trailing exit-code
/// digits have fully arrived (terminated by a newline), flush everything
/// before the marker to `sink`, reset the buffer, and report the parsed
/// exit code. Otherwise flush whatever is safe to flush -- everything up
/// to the last newline, minus a trailing safety window the size of
/// [`MARKER_TAIL`] so a sentinel straddling two reads is never split across
/// a flush -- and retain the rest.
pub(crate) async fn scan_buffer(buffer: &mut String, sentinel: &str, sink: &OutputSink) -> ScanOutcome {
    if let Some(pos) = buffer.find(sentinel) {
        let pre = buffer[..pos].to_string();
        if !pre.is_empty() {
            sink.push(&pre).await;
        }

        let after = pos + sentinel.len();
        if let Some(rel_nl) = buffer[after..].find('\n') {
            let digits = buffer[after..after + rel_nl].to_string();
            let code = digits.trim().parse::<i32>().ok();
            buffer.clear();
            return ScanOutcome::Resolved(code);
        }

        // Marker seen, digits not fully in yet -- keep from the sentinel on.
        let retained = buffer[pos..].to_string();
        *buffer = retained;
        return ScanOutcome::Pending;
    }

    match buffer.rfind('\n') {
        Some(last_nl) => {
            let flush_end = last_nl + 1;
            let keep_from = flush_end.saturating_sub(MARKER_TAIL);
            if keep_from > 0 {
                let to_flush = buffer[..keep_from].to_string();
                sink.push(&to_flush).await;
                *buffer = buffer[keep_from..].to_string();
            }
        }
        None => {
            let retain = sentinel.len().max(MARKER_TAIL);
            if buffer.len() > retain {
                let cut = buffer.len() - retain;
                let to_flush = buffer[..cut].to_string();
                sink.push(&to_flush).await;
                *buffer = buffer[cut..].to_string();
            }
        }
    }
    ScanOutcome::Pending
}
