//! Tests for the one-shot (non-persistent) execution path, forced via the
//! `OMP_SHELL_PERSIST` override so these don't depend on the platform
//! heuristic.

use shellcore::{ExecuteOptions, ShellConfig};
use std::sync::Mutex;
use std::time::Duration;

// `OMP_SHELL_PERSIST` is a process-wide env var; serialize tests that touch
// it so they don't race each other's value.
static ENV_LOCK: Mutex<()> = Mutex::new(());

#[tokio::test]
async fn one_shot_mode_runs_a_command_and_reports_its_exit_code() {
    let _guard = ENV_LOCK.lock().unwrap();
    unsafe {
        std::env::set_var("OMP_SHELL_PERSIST", "0");
    }

    let config = ShellConfig::new("/bin/bash");
    let result = shellcore::execute_bash(&config, "echo one-shot", ExecuteOptions::default())
        .await
        .expect("command runs");

    unsafe {
        std::env::remove_var("OMP_SHELL_PERSIST");
    }
    drop(_guard);

    assert_eq!(result.exit_code, Some(0));
    assert!(!result.cancelled);
    assert_eq!(result.output.trim_end(), "one-shot");
}

#[tokio::test]
async fn one_shot_mode_does_not_persist_state_between_calls() {
    let _guard = ENV_LOCK.lock().unwrap();
    unsafe {
        std::env::set_var("OMP_SHELL_PERSIST", "0");
    }

    let config = ShellConfig::new("/bin/bash");
    shellcore::execute_bash(&config, "export OMP_ONE_SHOT_VAR=set", ExecuteOptions::default())
        .await
        .expect("first command runs");

    let result = shellcore::execute_bash(
        &config,
        "echo [$OMP_ONE_SHOT_VAR]",
        ExecuteOptions::default(),
    )
    .await
    .expect("second command runs");

    unsafe {
        std::env::remove_var("OMP_SHELL_PERSIST");
    }
    drop(_guard);

    assert_eq!(result.output.trim_end(), "[]");
}

#[tokio::test]
async fn one_shot_mode_honors_a_timeout() {
    let _guard = ENV_LOCK.lock().unwrap();
    unsafe {
        std::env::set_var("OMP_SHELL_PERSIST", "0");
    }

    let config = ShellConfig::new("/bin/bash");
    let mut opts = ExecuteOptions::default();
    opts.timeout = Some(Duration::from_millis(150));

    let result = shellcore::execute_bash(&config, "sleep 30", opts)
        .await
        .expect("command resolves");

    unsafe {
        std::env::remove_var("OMP_SHELL_PERSIST");
    }
    drop(_guard);

    assert!(result.cancelled);
    assert_eq!(result.exit_code, None);
}
