//! Tests for [`shellcore::ShellConfig`] fingerprinting and family detection.

use shellcore::{ShellConfig, ShellFamily};

#[test]
fn fingerprint_is_stable_for_equal_configs() {
    let a = ShellConfig::new("/bin/bash").with_prefix("p").with_env("X", Some("1".into()));
    let b = ShellConfig::new("/bin/bash").with_prefix("p").with_env("X", Some("1".into()));
    assert_eq!(a.fingerprint(), b.fingerprint());
}

#[test]
fn fingerprint_differs_on_env_value() {
    let a = ShellConfig::new("/bin/bash").with_env("X", Some("1".into()));
    let b = ShellConfig::new("/bin/bash").with_env("X", Some("2".into()));
    assert_ne!(a.fingerprint(), b.fingerprint());
}

#[test]
fn fingerprint_distinguishes_unset_from_absent() {
    let unset = ShellConfig::new("/bin/bash").with_env("X", None);
    let absent = ShellConfig::new("/bin/bash");
    assert_ne!(unset.fingerprint(), absent.fingerprint());
}

#[test]
fn fingerprint_is_independent_of_env_insertion_order() {
    let a = ShellConfig::new("/bin/bash")
        .with_env("A", Some("1".into()))
        .with_env("B", Some("2".into()));
    let b = ShellConfig::new("/bin/bash")
        .with_env("B", Some("2".into()))
        .with_env("A", Some("1".into()));
    assert_eq!(a.fingerprint(), b.fingerprint());
}

#[test]
fn detect_recognizes_common_posix_shells() {
    for name in ["bash", "zsh", "sh", "dash", "ksh", "ash"] {
        let path = std::path::PathBuf::from(format!("/usr/bin/{name}"));
        assert_eq!(ShellFamily::detect(&path), Some(ShellFamily::Posix), "{name}");
    }
}

#[test]
fn detect_recognizes_fish() {
    let path = std::path::PathBuf::from("/usr/bin/fish");
    assert_eq!(ShellFamily::detect(&path), Some(ShellFamily::Fish));
}

#[test]
fn detect_returns_none_for_unknown_interpreters() {
    let path = std::path::PathBuf::from("/usr/bin/cmd.exe");
    assert_eq!(ShellFamily::detect(&path), None);
}

#[test]
fn from_env_falls_back_to_bin_bash_when_shell_is_unset() {
    // SAFETY: test-only, no other thread in this process reads $SHELL.
    let saved = std::env::var_os("SHELL");
    unsafe {
        std::env::remove_var("SHELL");
    }
    let config = ShellConfig::from_env();
    assert_eq!(config.interpreter, std::path::PathBuf::from("/bin/bash"));
    unsafe {
        match saved {
            Some(v) => std::env::set_var("SHELL", v),
            None => std::env::remove_var("SHELL"),
        }
    }
}

#[test]
fn sanitized_strips_startup_side_effect_vars() {
    let config = ShellConfig::new("/bin/bash")
        .with_env("BASH_ENV", Some("/tmp/evil.sh".into()))
        .with_env("ENV", Some("/tmp/evil2.sh".into()))
        .with_env("SAFE", Some("kept".into()))
        .sanitized();

    assert!(!config.env.contains_key("BASH_ENV"));
    assert!(!config.env.contains_key("ENV"));
    assert_eq!(config.env.get("SAFE").unwrap().as_deref(), Some("kept"));
}
