// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use super::AccountsConfig;

fn parse(args: &[&str]) -> AccountsConfig {
    AccountsConfig::parse_from(args)
}

#[test]
#[serial_test::serial]
fn defaults() -> anyhow::Result<()> {
    let config = parse(&["accounts"]);
    config.validate()?;
    assert_eq!(config.info_threshold(), Duration::from_secs(600));
    assert_eq!(config.max_backoff(), Duration::from_secs(60));
    assert!(!config.refresh);
    assert_eq!(config.log_format, "text");
    assert_eq!(config.log_level, "info");
    assert!(config.providers.is_none());
    Ok(())
}

#[test]
fn explicit_flags() -> anyhow::Result<()> {
    let config = parse(&[
        "accounts",
        "--store-path",
        "/tmp/acc.json",
        "--providers",
        "/tmp/providers.json",
        "--info-threshold-secs",
        "30",
        "--max-backoff-secs",
        "5",
        "--refresh",
        "--log-format",
        "json",
    ]);
    config.validate()?;
    assert_eq!(config.store_path(), PathBuf::from("/tmp/acc.json"));
    assert_eq!(config.providers.as_deref(), Some(std::path::Path::new("/tmp/providers.json")));
    assert!(config.refresh);

    let ctx = config.provider_context();
    assert_eq!(ctx.refresh.info_threshold, Duration::from_secs(30));
    assert_eq!(ctx.refresh.max_backoff, Duration::from_secs(5));
    assert_eq!(ctx.refresh.initial_backoff, Duration::from_secs(1));
    Ok(())
}

#[test]
fn initial_backoff_never_exceeds_cap() {
    let config = parse(&["accounts", "--max-backoff-secs", "0"]);
    let settings = config.refresh_settings();
    assert_eq!(settings.initial_backoff, Duration::ZERO);
    assert_eq!(settings.backoff(3), Duration::ZERO);
}

#[yare::parameterized(
    bad_format     = { &["accounts", "--log-format", "xml"], "invalid log format" },
    zero_threshold = { &["accounts", "--info-threshold-secs", "0"], "must be positive" },
)]
fn invalid_config(args: &[&str], expected_substr: &str) {
    let config = parse(args);
    crate::assert_err_contains!(config.validate(), expected_substr);
}

#[test]
#[serial_test::serial]
fn store_path_defaults_to_state_dir() {
    let dir = std::env::var_os("ACCOUNTS_STATE_DIR");
    std::env::set_var("ACCOUNTS_STATE_DIR", "/var/lib/acc");
    let config = parse(&["accounts"]);
    assert_eq!(config.store_path(), PathBuf::from("/var/lib/acc/accounts.json"));
    match dir {
        Some(v) => std::env::set_var("ACCOUNTS_STATE_DIR", v),
        None => std::env::remove_var("ACCOUNTS_STATE_DIR"),
    }
}

#[test]
#[serial_test::serial]
fn env_overrides_defaults() {
    std::env::set_var("ACCOUNTS_INFO_THRESHOLD_SECS", "42");
    let config = parse(&["accounts"]);
    std::env::remove_var("ACCOUNTS_INFO_THRESHOLD_SECS");
    assert_eq!(config.info_threshold_secs, 42);
}
