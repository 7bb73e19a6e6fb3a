//! Shell configuration and the fingerprint that keys the session registry.
//!
//! A [`ShellConfig`] is an immutable descriptor of "which shell, with what
//! env, sourcing what snapshot" -- two configs that fingerprint equal share
//! a [`crate::session::ShellSession`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Environment variables that must never leak into a spawned shell: they'd
/// run arbitrary startup scripts the moment the interpreter launches, which
/// would sidestep every isolation guarantee this crate provides.
const STARTUP_SIDE_EFFECT_VARS: &[&str] = &["BASH_ENV", "ENV"];

/// Which family of shell script the Command Script Builder should emit.
///
/// POSIX-family shells (bash, zsh, sh, dash, ksh, ...) share one script
/// shape; fish is different enough (no `set -e`, no `trap`, function
/// introspection via `functions` instead of `declare -f`) to need its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellFamily {
    Posix,
    Fish,
}

impl ShellFamily {
    /// Detect the family from an interpreter path's file-name stem.
    ///
    /// Returns `None` for anything not recognized, which is the signal the
    /// Executor Entry Point uses to fall back to one-shot mode.
    #[must_use]
    pub fn detect(interpreter: &Path) -> Option<Self> {
        let stem = interpreter.file_name()?.to_str()?;
        match stem {
            "bash" | "zsh" | "sh" | "dash" | "ksh" | "ash" => Some(Self::Posix),
            "fish" => Some(Self::Fish),
            _ => None,
        }
    }

    /// The login-mode flag this family accepts, if any.
    #[must_use]
    pub fn login_flag(self) -> Option<&'static str> {
        match self {
            Self::Posix | Self::Fish => Some("-l"),
        }
    }
}

/// Immutable descriptor of a shell to launch: interpreter, launch args,
/// inherited env bindings, an optional command prefix, and an optional
/// snapshot rc-file to `source` at startup.
#[derive(Debug, Clone)]
pub struct ShellConfig {
    pub interpreter: PathBuf,
    pub args: Vec<String>,
    /// `Some(value)` exports the binding; `None` means "unset this in the
    /// child's environment even if the parent process has it set".
    pub env: BTreeMap<String, Option<String>>,
    pub prefix: Option<String>,
    pub snapshot_path: Option<PathBuf>,
    /// Suppress the shell family's login flag even if one would otherwise
    /// be passed (mirrors the `OMP_BASH_NO_LOGIN` environment override).
    pub no_login: bool,
}

impl ShellConfig {
    /// A bare config for the given interpreter, with no env, prefix, or
    /// snapshot.
    #[must_use]
    pub fn new(interpreter: impl Into<PathBuf>) -> Self {
        Self {
            interpreter: interpreter.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            prefix: None,
            snapshot_path: None,
            no_login: false,
        }
    }

    /// Build a default config from the process environment: the caller's
    /// `$SHELL` (falling back to `/bin/bash` if unset or empty), with
    /// `no_login` honoring `OMP_BASH_NO_LOGIN`/`OMP_NO_LOGIN_SHELL`. This is
    /// a convenience for callers that drive [`crate::session::ShellSession`]
    /// directly rather than through [`crate::execute_bash`], which applies
    /// the same override itself regardless of how the config was built.
    #[must_use]
    pub fn from_env() -> Self {
        let interpreter = std::env::var_os("SHELL")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("/bin/bash"));
        let mut config = Self::new(interpreter);
        config.no_login = no_login_override_from_env();
        config
    }

    #[must_use]
    pub fn with_snapshot(mut self, path: impl Into<PathBuf>) -> Self {
        self.snapshot_path = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: Option<String>) -> Self {
        self.env.insert(key.into(), value);
        self
    }

    /// Strip env vars that would cause startup-script side effects
    /// (`BASH_ENV`, `ENV`) mid-session -- sourced the moment a new shell
    /// launches, regardless of our own snapshot machinery.
    #[must_use]
    pub fn sanitized(mut self) -> Self {
        for var in STARTUP_SIDE_EFFECT_VARS {
            self.env.remove(*var);
        }
        self
    }

    #[must_use]
    pub fn family(&self) -> Option<ShellFamily> {
        ShellFamily::detect(&self.interpreter)
    }

    /// Deterministic serialization of this config: interpreter path,
    /// prefix, snapshot path, and the env map sorted by key and joined.
    /// Two configs with equal fingerprints share a session.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let mut out = String::new();
        out.push_str(&self.interpreter.to_string_lossy());
        out.push('\0');
        out.push_str(self.prefix.as_deref().unwrap_or(""));
        out.push('\0');
        if let Some(p) = &self.snapshot_path {
            out.push_str(&p.to_string_lossy());
        }
        out.push('\0');
        // BTreeMap already iterates in key order.
        for (k, v) in &self.env {
            out.push_str(k);
            out.push('=');
            if let Some(v) = v {
                out.push_str(v);
            } else {
                out.push_str("\u{0}unset");
            }
            out.push(';');
        }
        out
    }
}

/// Parse one of the documented truthy/falsy environment-variable spellings
/// (`1|true|yes|on` / `0|false|no|off`). Unrecognized or unset values
/// return `None`, leaving the caller's default in place.
#[must_use]
pub fn parse_bool_env(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// `OMP_BASH_NO_LOGIN` plus its legacy alias `OMP_NO_LOGIN_SHELL`, checked in
/// that order. Shared by [`ShellConfig::from_env`] and
/// [`crate::executor::execute_bash`] so the two never drift apart.
#[must_use]
pub(crate) fn no_login_override_from_env() -> bool {
    for var in ["OMP_BASH_NO_LOGIN", "OMP_NO_LOGIN_SHELL"] {
        if let Ok(v) = std::env::var(var) {
            if let Some(b) = parse_bool_env(&v) {
                return b;
            }
        }
    }
    false
}
