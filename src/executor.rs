//! Executor Entry Point: decides persistent vs. one-shot execution, applies
//! the two documented environment overrides, and retries a startup failure
//! exactly once against a freshly spawned session.

use crate::config::ShellConfig;
use crate::config::{no_login_override_from_env, parse_bool_env};
use crate::error::ShellError;
use crate::oneshot;
use crate::registry::SessionRegistry;
use crate::session::{ExecuteOptions, ExecuteResult};
use std::sync::OnceLock;

static REGISTRY: OnceLock<SessionRegistry> = OnceLock::new();

fn global_registry() -> &'static SessionRegistry {
    REGISTRY.get_or_init(SessionRegistry::new)
}

/// Dispose every live persistent session. Call once, from the host
/// process's own shutdown sequence -- this crate never installs a signal
/// handler of its own.
pub async fn shutdown() {
    if let Some(registry) = REGISTRY.get() {
        registry.shutdown().await;
    }
}

fn persistence_override() -> Option<bool> {
    std::env::var("OMP_SHELL_PERSIST")
        .ok()
        .and_then(|v| parse_bool_env(&v))
}

/// Decide whether this config should run persistently. `OMP_SHELL_PERSIST`
/// is obeyed unconditionally when set -- the persistent path always falls
/// back to POSIX syntax for an unrecognized family (session.rs spawns with
/// `ShellFamily::Posix` as its default), so an unrecognized family is not a
/// reason to veto an explicit operator override. The only non-negotiable
/// constraint is the platform: the persistent path needs process groups,
/// which this crate only supports on Unix.
fn wants_persistence(config: &ShellConfig) -> bool {
    if let Some(forced) = persistence_override() {
        return forced && cfg!(unix);
    }
    cfg!(unix) && config.family().is_some()
}

/// Run `command` against the shell described by `config`.
///
/// Resolves persistent-vs-one-shot, then either reuses (or creates) a
/// session in the process-wide registry, or spawns a throwaway shell for
/// exactly this one command. A startup failure on the persistent path
/// (the shell died, or its stdin was unusable, before the first command
/// could run) is retried exactly once against a brand-new session; no
/// other failure is retried.
pub async fn execute_bash(
    config: &ShellConfig,
    command: &str,
    options: ExecuteOptions,
) -> Result<ExecuteResult, ShellError> {
    let mut config = config.clone().sanitized();
    if no_login_override_from_env() {
        config.no_login = true;
    }

    if !wants_persistence(&config) {
        return oneshot::execute(&config, command, options).await;
    }

    let registry = global_registry();
    match registry.execute(&config, command, options.clone()).await {
        Ok(result) => Ok(result),
        Err(e) if e.is_restartable() => {
            tracing::warn!(error = %e, "shell session startup failed, retrying once with a fresh session");
            registry.evict(&config).await;
            registry.execute(&config, command, options).await
        }
        Err(e) => Err(e),
    }
}
