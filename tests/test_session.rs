//! End-to-end tests for the persistent shell session: env/cwd persistence
//! across calls, immunity to `exit`/`logout`/`exec`, `errexit`/trap
//! isolation, cancellation, and session-death recovery.

use shellcore::{CancelHandle, ExecuteOptions, ShellConfig};
use std::time::Duration;

fn bash() -> ShellConfig {
    ShellConfig::new("/bin/bash")
}

#[tokio::test]
async fn echo_hello_returns_output_and_zero_exit() {
    let config = bash();
    let result = shellcore::execute_bash(&config, "echo hello", ExecuteOptions::default())
        .await
        .expect("command runs");

    assert_eq!(result.exit_code, Some(0));
    assert!(!result.cancelled);
    assert_eq!(result.output.trim_end(), "hello");
}

#[tokio::test]
async fn exported_env_persists_to_the_next_call_same_session() {
    let config = ShellConfig::new("/bin/bash").with_prefix("FINGERPRINT_A");
    shellcore::execute_bash(&config, "export OMP_TEST_VAR=persisted", ExecuteOptions::default())
        .await
        .expect("first command runs");

    let result = shellcore::execute_bash(&config, "echo $OMP_TEST_VAR", ExecuteOptions::default())
        .await
        .expect("second command runs");

    assert_eq!(result.output.trim_end(), "persisted");
}

#[tokio::test]
async fn cwd_change_persists_to_the_next_call_same_session() {
    let config = ShellConfig::new("/bin/bash").with_prefix("FINGERPRINT_B");
    let dir = tempfile::tempdir().expect("tempdir");
    let cd_cmd = format!("cd {}", dir.path().display());
    shellcore::execute_bash(&config, &cd_cmd, ExecuteOptions::default())
        .await
        .expect("cd runs");

    let result = shellcore::execute_bash(&config, "pwd", ExecuteOptions::default())
        .await
        .expect("pwd runs");

    let canonical_expected = dir.path().canonicalize().unwrap();
    let canonical_actual = std::path::Path::new(result.output.trim_end())
        .canonicalize()
        .unwrap();
    assert_eq!(canonical_actual, canonical_expected);
}

#[tokio::test]
async fn per_command_env_does_not_leak_to_the_next_call() {
    let config = ShellConfig::new("/bin/bash").with_prefix("FINGERPRINT_C");
    let mut opts = ExecuteOptions::default();
    opts.env = vec![("OMP_SCOPED".to_string(), Some("only-this-call".to_string()))];
    let first = shellcore::execute_bash(&config, "echo $OMP_SCOPED", opts)
        .await
        .expect("first command runs");
    assert_eq!(first.output.trim_end(), "only-this-call");

    let second = shellcore::execute_bash(&config, "echo [$OMP_SCOPED]", ExecuteOptions::default())
        .await
        .expect("second command runs");
    assert_eq!(second.output.trim_end(), "[]");
}

#[tokio::test]
async fn exit_inside_command_does_not_kill_the_session() {
    let config = ShellConfig::new("/bin/bash").with_prefix("FINGERPRINT_D");
    let first = shellcore::execute_bash(&config, "exit 7", ExecuteOptions::default())
        .await
        .expect("exit runs");
    assert_eq!(first.exit_code, Some(7));

    let second = shellcore::execute_bash(&config, "echo still alive", ExecuteOptions::default())
        .await
        .expect("session survived");
    assert_eq!(second.output.trim_end(), "still alive");
}

#[tokio::test]
async fn errexit_inside_a_command_does_not_abort_the_whole_session() {
    let config = ShellConfig::new("/bin/bash").with_prefix("FINGERPRINT_E");
    let first = shellcore::execute_bash(
        &config,
        "set -e; false; echo unreachable",
        ExecuteOptions::default(),
    )
    .await
    .expect("command runs");
    assert_eq!(first.exit_code, Some(1));
    assert!(!first.output.contains("unreachable"));

    let second = shellcore::execute_bash(&config, "echo next command runs fine", ExecuteOptions::default())
        .await
        .expect("next command runs");
    assert_eq!(second.exit_code, Some(0));
}

#[tokio::test]
async fn sigint_trap_inside_a_command_is_isolated() {
    let config = ShellConfig::new("/bin/bash").with_prefix("FINGERPRINT_F");
    shellcore::execute_bash(&config, "trap 'echo caught' INT", ExecuteOptions::default())
        .await
        .expect("trap installs");

    // The next command's own abort protocol must still be able to
    // interrupt it -- a leaked trap from the previous command would
    // swallow the signal instead.
    let signal = CancelHandle::new();
    let signal_clone = signal.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        signal_clone.cancel();
    });

    let mut opts = ExecuteOptions::default();
    opts.signal = Some(signal);
    let result = shellcore::execute_bash(&config, "sleep 30", opts)
        .await
        .expect("command resolves");

    assert!(result.cancelled);
    assert_eq!(result.exit_code, None);
}

#[tokio::test]
async fn timeout_cancels_a_long_running_command() {
    let config = ShellConfig::new("/bin/bash").with_prefix("FINGERPRINT_G");
    let mut opts = ExecuteOptions::default();
    opts.timeout = Some(Duration::from_millis(150));

    let started = std::time::Instant::now();
    let result = shellcore::execute_bash(&config, "sleep 30", opts)
        .await
        .expect("command resolves");

    assert!(result.cancelled);
    assert_eq!(result.exit_code, None);
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn session_survives_and_recreates_after_the_shell_is_killed() {
    let config = ShellConfig::new("/bin/bash").with_prefix("FINGERPRINT_H");
    shellcore::execute_bash(&config, "export OMP_BEFORE_KILL=1", ExecuteOptions::default())
        .await
        .expect("first command runs");

    // Ask the shell to terminate itself outright (not via our `exit`
    // shim, which only returns from the current script).
    let killed = shellcore::execute_bash(&config, "kill -KILL $$", ExecuteOptions::default())
        .await
        .expect("command resolves even though the shell died");
    assert!(killed.cancelled);
    assert_eq!(killed.exit_code, None);

    // The next call on the same fingerprint transparently gets a new
    // session -- env from before the kill is gone, but the call succeeds.
    let after = shellcore::execute_bash(
        &config,
        "echo [$OMP_BEFORE_KILL] recovered",
        ExecuteOptions::default(),
    )
    .await
    .expect("a fresh session is spawned transparently");
    assert_eq!(after.output.trim_end(), "[] recovered");
}

#[tokio::test]
async fn a_command_printing_a_marker_shaped_line_does_not_falsely_resolve() {
    // The nonce is random per command, so a command that prints something
    // shaped like a completion marker (but with a nonce it could not have
    // known in advance) must not be mistaken for the real one.
    let config = ShellConfig::new("/bin/bash").with_prefix("FINGERPRINT_J");
    let result = shellcore::execute_bash(
        &config,
        "echo '__OMP_CMD_DONE__0000000000000000000000000000000__0'; echo after",
        ExecuteOptions::default(),
    )
    .await
    .expect("command runs");

    assert_eq!(result.exit_code, Some(0));
    assert!(!result.cancelled);
    assert!(result.output.contains("__OMP_CMD_DONE__0000000000000000000000000000000__0"));
    assert!(result.output.contains("after"));
}

#[tokio::test]
async fn shell_quoting_handles_single_quotes_and_special_characters() {
    let config = ShellConfig::new("/bin/bash").with_prefix("FINGERPRINT_I");
    let mut opts = ExecuteOptions::default();
    opts.env = vec![(
        "OMP_QUOTE_TEST".to_string(),
        Some("it's a \"test\" with $pecial `chars`".to_string()),
    )];
    let result = shellcore::execute_bash(&config, "printf '%s' \"$OMP_QUOTE_TEST\"", opts)
        .await
        .expect("command runs");

    assert_eq!(result.output, "it's a \"test\" with $pecial `chars`");
}
