//! Session Registry: fingerprint-keyed reuse of persistent shell sessions.
//!
//! Two calls whose [`ShellConfig`] fingerprints match share the same
//! [`ShellSession`]; a stale (closed) entry is transparently replaced the
//! next time it is looked up, so a dead shell never surfaces as a hard
//! error to a caller that just wants "run this in my session".

use crate::config::ShellConfig;
use crate::error::ShellError;
use crate::session::{ExecuteOptions, ExecuteResult, ShellSession};
use std::collections::HashMap;
use tokio::sync::Mutex;

/// Holds every live persistent session for one process.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, ShellSession>>,
}

impl SessionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Run `command` against the session for `config`, creating one if
    /// none exists yet or the existing one has died.
    pub async fn execute(
        &self,
        config: &ShellConfig,
        command: &str,
        options: ExecuteOptions,
    ) -> Result<ExecuteResult, ShellError> {
        let session = self.get_or_create(config).await?;
        session.execute(command, options).await
    }

    /// Force the session for `config` to be recreated on the next call,
    /// used by the Executor Entry Point's restart-on-startup-failure path.
    pub async fn evict(&self, config: &ShellConfig) {
        let fingerprint = config.fingerprint();
        let mut sessions = self.sessions.lock().await;
        if let Some(session) = sessions.remove(&fingerprint) {
            session.dispose().await;
        }
    }

    async fn get_or_create(&self, config: &ShellConfig) -> Result<ShellSession, ShellError> {
        let fingerprint = config.fingerprint();
        let mut sessions = self.sessions.lock().await;

        if let Some(existing) = sessions.get(&fingerprint) {
            if !existing.is_closed() {
                return Ok(existing.clone());
            }
            tracing::info!(%fingerprint, "replacing dead shell session");
            sessions.remove(&fingerprint);
        }

        let session = ShellSession::start(config).await?;
        sessions.insert(fingerprint, session.clone());
        Ok(session)
    }

    /// Dispose every live session. Intended to be called once, from the
    /// host process's shutdown sequence.
    pub async fn shutdown(&self) {
        let mut sessions = self.sessions.lock().await;
        let drained: Vec<_> = sessions.drain().map(|(_, s)| s).collect();
        drop(sessions);
        for session in drained {
            session.dispose().await;
        }
    }
}
