// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

use crate::account::refresh::RefreshSettings;
use crate::provider::ProviderContext;
use crate::store::default_store_path;

/// Configuration for the accounts tool.
#[derive(Debug, Clone, clap::Parser)]
#[command(name = "accounts", version, about = "List and check stored provider accounts.")]
pub struct AccountsConfig {
    /// Path to the accounts JSON file. Defaults to the state directory.
    #[arg(long, env = "ACCOUNTS_STORE_PATH")]
    pub store_path: Option<PathBuf>,

    /// Path to the provider definitions JSON file.
    #[arg(long, env = "ACCOUNTS_PROVIDERS")]
    pub providers: Option<PathBuf>,

    /// Age in seconds after which cached account info is re-checked.
    #[arg(long, default_value_t = 600, env = "ACCOUNTS_INFO_THRESHOLD_SECS")]
    pub info_threshold_secs: u64,

    /// Cap in seconds for the backoff after failed checks.
    #[arg(long, default_value_t = 60, env = "ACCOUNTS_MAX_BACKOFF_SECS")]
    pub max_backoff_secs: u64,

    /// Check every account before listing.
    #[arg(long, env = "ACCOUNTS_REFRESH")]
    pub refresh: bool,

    /// Log format (json or text).
    #[arg(long, default_value = "text", env = "ACCOUNTS_LOG_FORMAT")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "ACCOUNTS_LOG_LEVEL")]
    pub log_level: String,
}

impl AccountsConfig {
    pub fn store_path(&self) -> PathBuf {
        self.store_path.clone().unwrap_or_else(default_store_path)
    }

    pub fn info_threshold(&self) -> Duration {
        Duration::from_secs(self.info_threshold_secs)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.max_backoff_secs)
    }

    /// Refresh settings derived from the flags. The initial backoff never
    /// exceeds the cap.
    pub fn refresh_settings(&self) -> RefreshSettings {
        let defaults = RefreshSettings::default();
        let max_backoff = self.max_backoff();
        RefreshSettings {
            info_threshold: self.info_threshold(),
            initial_backoff: defaults.initial_backoff.min(max_backoff),
            max_backoff,
        }
    }

    pub fn provider_context(&self) -> ProviderContext {
        ProviderContext { refresh: self.refresh_settings() }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        match self.log_format.as_str() {
            "json" | "text" => {}
            other => anyhow::bail!("invalid log format: {other} (expected json or text)"),
        }
        if self.info_threshold_secs == 0 {
            anyhow::bail!("--info-threshold-secs must be positive");
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
