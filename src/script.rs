//! Command Script Builder: pure text generation for one command run inside
//! a persistent shell.
//!
//! Given a shell family, an optional cwd, per-command env, an optional
//! session prefix, and a marker, [`build_script`] produces the exact text
//! that, once written to the shell's stdin, runs the command in a way that
//! cannot tear the shell down and always ends with the completion marker
//! line.

use crate::config::ShellFamily;
use std::path::Path;

/// Prefix every completion marker starts with. The full marker is this
/// prefix plus a 32-hex-character nonce plus a trailing `__`.
pub const MARKER_PREFIX: &str = "__OMP_CMD_DONE__";

/// Safety lookback window (bytes) kept unflushed by the chunk processor so
/// the sentinel can never be split across two flushes.
pub const MARKER_TAIL: usize = 128;

/// Build the full marker string for a given nonce (32 lowercase hex chars,
/// no separators -- a UUID v4 with its dashes removed).
#[must_use]
pub fn marker_for_nonce(nonce: &str) -> String {
    format!("{MARKER_PREFIX}{nonce}__")
}

/// The sentinel the chunk processor searches for: the marker with a
/// leading newline, so it can never be confused with a marker string that
/// happens to appear mid-line in the command's own output.
#[must_use]
pub fn sentinel_for_marker(marker: &str) -> String {
    format!("\n{marker}")
}

/// Escape a string for inclusion inside single quotes in POSIX or fish
/// shell syntax: close the quote, emit an escaped literal quote, reopen.
#[must_use]
pub fn shell_quote_single(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for ch in value.chars() {
        if ch == '\'' {
            out.push_str("'\\''");
        } else {
            out.push(ch);
        }
    }
    out.push('\'');
    out
}

/// Everything the Command Script Builder needs to render one command.
pub struct ScriptInput<'a> {
    pub cwd: Option<&'a Path>,
    pub env: &'a [(String, Option<String>)],
    pub prefix: Option<&'a str>,
    pub command: &'a str,
    pub marker: &'a str,
}

/// Build the `source` command used to replay a snapshot into a fresh shell.
/// POSIX gets `2>/dev/null` so a snapshot that warns on stderr during
/// sourcing doesn't leak into the startup command's output; fish omits it.
#[must_use]
pub fn snapshot_source_command(family: ShellFamily, path: &Path) -> String {
    let quoted = shell_quote_single(&path.to_string_lossy());
    match family {
        ShellFamily::Posix => format!("source -- {quoted} 2>/dev/null"),
        ShellFamily::Fish => format!("source -- {quoted}"),
    }
}

/// Render the script for one command, dispatching on shell family.
#[must_use]
pub fn build_script(family: ShellFamily, input: &ScriptInput<'_>) -> String {
    match family {
        ShellFamily::Posix => build_posix_script(input),
        ShellFamily::Fish => build_fish_script(input),
    }
}

fn render_command_line(input: &ScriptInput<'_>) -> String {
    let body = if input.command.trim().is_empty() {
        ":".to_string()
    } else {
        input.command.to_string()
    };
    match input.prefix {
        Some(prefix) if !prefix.is_empty() => format!("{prefix} {body}"),
        _ => body,
    }
}

/// POSIX-family script: save/clear errexit and the INT trap, shim
/// `exit`/`logout`/`exec`, apply env and cwd, run the command, restore
/// everything, emit the marker.
fn build_posix_script(input: &ScriptInput<'_>) -> String {
    let mut s = String::new();

    // Step 1: save and clear errexit.
    s.push_str("__omp_saved_flags=$-\n");
    s.push_str("case $__omp_saved_flags in *e*) __omp_had_errexit=1 ;; *) __omp_had_errexit=0 ;; esac\n");
    s.push_str("set +e\n");

    // Step 2: save and clear the INT trap.
    s.push_str("__omp_saved_int_trap=$(trap -p INT)\n");
    s.push_str("trap - INT\n");

    // Step 3: capture exit/logout/exec definitions.
    for name in ["exit", "logout", "exec"] {
        s.push_str(&format!(
            "__omp_saved_{name}=$(declare -f {name} 2>/dev/null || true)\n"
        ));
    }

    // Step 4: install shims.
    s.push_str("exit() { return \"${1:-0}\"; }\n");
    s.push_str("logout() { return \"${1:-0}\"; }\n");
    s.push_str("exec() { command \"$@\"; return $?; }\n");

    // Step 5: per-command env.
    let mut unexported = Vec::new();
    for (key, value) in input.env {
        match value {
            Some(v) => {
                s.push_str(&format!("export {key}={}\n", shell_quote_single(v)));
            }
            None => {
                s.push_str(&format!("unset {key}\n"));
            }
        }
        unexported.push(key.clone());
    }

    // Step 6: cwd.
    if let Some(cwd) = input.cwd {
        s.push_str(&format!(
            "cd -- {}\n",
            shell_quote_single(&cwd.to_string_lossy())
        ));
    }

    // Step 7: the user command.
    s.push_str(&render_command_line(input));
    s.push('\n');

    // Step 8: capture $?.
    s.push_str("__omp_status=$?\n");

    // State isolation: per-command env must not persist.
    for key in &unexported {
        s.push_str(&format!("unset {key}\n"));
    }

    // Step 9: restore saved definitions/trap/errexit.
    for name in ["exit", "logout", "exec"] {
        s.push_str(&format!(
            "if [ -n \"$__omp_saved_{name}\" ]; then eval \"$__omp_saved_{name}\"; else unset -f {name} 2>/dev/null; fi\n"
        ));
    }
    s.push_str("if [ -n \"$__omp_saved_int_trap\" ]; then eval \"$__omp_saved_int_trap\"; else trap - INT; fi\n");
    s.push_str("if [ \"$__omp_had_errexit\" = 1 ]; then set -e; fi\n");

    // Step 10: emit the marker.
    s.push_str(&format!(
        "printf '\\n{}%d\\n' \"$__omp_status\"\n",
        input.marker
    ));

    s
}

/// Fish script: semantically equivalent, but fish has no `errexit`/`trap`
/// concept to save, uses `functions -q`/`-c` for introspection, `set -lx`
/// for scoped env, and a `begin ... end` block so the per-command state
/// doesn't leak. The shim functions stash the exit status in a global
/// (`__omp_exit_code`) because the `begin ... end` block is a new scope
/// and `status` inside it would otherwise be lost once the block ends.
///
/// Whether fish's function-copy semantics preserve `__omp_exit_code`
/// correctly across one command's life is plausible but not proven here --
/// it is a single global, set inside the block and read immediately after,
/// which sidesteps the scoping question that a captured/closed-over
/// variable would raise.
fn build_fish_script(input: &ScriptInput<'_>) -> String {
    let mut s = String::new();

    for name in ["exit", "logout", "exec"] {
        s.push_str(&format!(
            "functions -q {name}; and functions -c {name} __omp_saved_{name}; or set -g __omp_had_{name} 0\n"
        ));
        s.push_str(&format!("functions -q {name}; and set -g __omp_had_{name} 1\n"));
    }

    s.push_str("function exit\n    return $argv[1]\nend\n");
    s.push_str("function logout\n    return $argv[1]\nend\n");
    s.push_str("function exec\n    command $argv\n    return $status\nend\n");

    s.push_str("begin\n");
    for (key, value) in input.env {
        match value {
            Some(v) => {
                s.push_str(&format!("    set -lx {key} {}\n", shell_quote_single(v)));
            }
            None => {
                s.push_str(&format!("    set -e {key}\n"));
            }
        }
    }
    if let Some(cwd) = input.cwd {
        s.push_str(&format!(
            "    cd -- {}\n",
            shell_quote_single(&cwd.to_string_lossy())
        ));
    }
    s.push_str("    ");
    s.push_str(&render_command_line(input));
    s.push('\n');
    s.push_str("    set -g __omp_exit_code $status\n");
    s.push_str("end\n");

    for name in ["exit", "logout", "exec"] {
        s.push_str(&format!("functions -e {name}\n"));
        s.push_str(&format!(
            "if test \"$__omp_had_{name}\" = 1\n    functions -c __omp_saved_{name} {name}\n    functions -e __omp_saved_{name}\nend\n"
        ));
    }

    s.push_str(&format!(
        "printf '\\n{}%d\\n' $__omp_exit_code\n",
        input.marker
    ));

    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_single_escapes_embedded_quotes() {
        assert_eq!(shell_quote_single("abc"), "'abc'");
        assert_eq!(shell_quote_single("it's"), "'it'\\''s'");
        assert_eq!(shell_quote_single(""), "''");
    }

    #[test]
    fn sentinel_is_marker_with_leading_newline() {
        let marker = marker_for_nonce("deadbeef");
        assert_eq!(sentinel_for_marker(&marker), format!("\n{marker}"));
    }

    #[test]
    fn posix_script_ends_with_the_marker_printf() {
        let input = ScriptInput {
            cwd: None,
            env: &[],
            prefix: None,
            command: "echo hi",
            marker: "__OMP_CMD_DONE__abc__",
        };
        let script = build_posix_script(&input);
        assert!(script.contains("echo hi\n"));
        assert!(script.trim_end().ends_with("__OMP_CMD_DONE__abc__%d' \"$__omp_status\""));
        assert!(script.contains("exit() { return \"${1:-0}\"; }"));
        assert!(script.contains("trap - INT"));
    }

    #[test]
    fn posix_script_unsets_per_command_env_after_running() {
        let env = vec![("SCOPED".to_string(), Some("1".to_string()))];
        let input = ScriptInput {
            cwd: None,
            env: &env,
            prefix: None,
            command: "echo $SCOPED",
            marker: "__OMP_CMD_DONE__x__",
        };
        let script = build_posix_script(&input);
        let export_pos = script.find("export SCOPED=").unwrap();
        let command_pos = script.find("echo $SCOPED").unwrap();
        let unset_pos = script.rfind("unset SCOPED").unwrap();
        assert!(export_pos < command_pos);
        assert!(command_pos < unset_pos);
    }

    #[test]
    fn posix_script_applies_cwd_before_the_command() {
        let input = ScriptInput {
            cwd: Some(Path::new("/tmp")),
            env: &[],
            prefix: None,
            command: "pwd",
            marker: "__OMP_CMD_DONE__x__",
        };
        let script = build_posix_script(&input);
        assert!(script.contains("cd -- '/tmp'\n"));
        assert!(script.find("cd -- '/tmp'").unwrap() < script.find("pwd").unwrap());
    }

    #[test]
    fn empty_command_becomes_a_no_op() {
        let input = ScriptInput {
            cwd: None,
            env: &[],
            prefix: None,
            command: "   ",
            marker: "__OMP_CMD_DONE__x__",
        };
        let script = build_posix_script(&input);
        assert!(script.contains("\n:\n"));
    }

    #[test]
    fn fish_script_uses_begin_end_block_and_global_exit_code() {
        let input = ScriptInput {
            cwd: None,
            env: &[],
            prefix: None,
            command: "echo hi",
            marker: "__OMP_CMD_DONE__abc__",
        };
        let script = build_fish_script(&input);
        assert!(script.contains("begin\n"));
        assert!(script.contains("set -g __omp_exit_code $status"));
        assert!(script.contains("function exit"));
    }

    #[test]
    fn build_script_dispatches_on_family() {
        let input = ScriptInput {
            cwd: None,
            env: &[],
            prefix: None,
            command: "echo hi",
            marker: "__OMP_CMD_DONE__abc__",
        };
        assert!(build_script(ShellFamily::Posix, &input).contains("set +e"));
        assert!(build_script(ShellFamily::Fish, &input).contains("begin\n"));
    }
}
