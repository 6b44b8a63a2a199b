// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Accounts: a concurrent registry of per-service login credentials.
//!
//! The [`registry::AccountRegistry`] owns every account, keyed by service and
//! login. Accounts are built by provider factories, checked against their
//! provider in the background, persisted through an [`store::AccountStore`],
//! and handed out at random by [`registry::AccountRegistry::select_for`].

pub mod account;
pub mod config;
pub mod events;
pub mod provider;
pub mod registry;
pub mod store;
pub mod test_support;

use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::AccountsConfig;
use crate::events::BroadcastNotifier;
use crate::provider::{load_providers, ProviderTable};
use crate::registry::{AccountListing, AccountRegistry};
use crate::store::JsonFileStore;

/// Install the process-wide rustls crypto provider.
///
/// reqwest is built without a bundled provider. Safe to call repeatedly.
pub fn ensure_crypto_provider() {
    let _ = rustls::crypto::ring::default_provider().install_default();
}

/// Initialize tracing/logging from config.
///
/// Uses `try_init` so it's safe to call multiple times (e.g. from tests).
pub fn init_tracing(config: &AccountsConfig) {
    use tracing_subscriber::fmt;

    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    let result = match config.log_format.as_str() {
        "json" => fmt::fmt().with_env_filter(filter).json().with_writer(std::io::stderr).try_init(),
        _ => fmt::fmt().with_env_filter(filter).with_writer(std::io::stderr).try_init(),
    };
    drop(result);
}

/// Build a registry from config and load the stored accounts.
pub async fn open(config: &AccountsConfig) -> anyhow::Result<Arc<AccountRegistry>> {
    let providers = match config.providers {
        Some(ref path) => load_providers(path)?,
        None => ProviderTable::new(),
    };
    if providers.is_empty() {
        warn!("no providers configured, stored accounts will be skipped");
    }

    let store_path = config.store_path();
    info!(store = %store_path.display(), providers = ?providers.services(), "opening account registry");

    let registry = AccountRegistry::new(
        providers,
        config.provider_context(),
        Arc::new(JsonFileStore::new(store_path)),
        Arc::new(BroadcastNotifier::default()),
    );
    registry.load().await?;
    Ok(registry)
}

/// Load the registry, optionally check every account, and snapshot it.
pub async fn run(config: AccountsConfig) -> anyhow::Result<AccountListing> {
    config.validate()?;
    let registry = open(&config).await?;

    if config.refresh {
        registry.refresh_all().await;
    }
    Ok(registry.list_all(false).await)
}
