// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Providers: per-service account factories and the lookup table built at
//! startup.
//!
//! A service without a registered factory is unknown. The registry skips
//! accounts for unknown services with a warning.

pub mod fixed;
pub mod http;

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::account::refresh::RefreshSettings;
use crate::account::{AccountInfo, Credential, Options, ProviderAccount};

/// Future returned by [`InfoFetcher::fetch`].
pub type FetchFuture<'a> = Pin<Box<dyn Future<Output = Result<AccountInfo, FetchError>> + Send + 'a>>;

/// Why a remote status check did not produce info.
#[derive(Debug)]
pub enum FetchError {
    /// The provider rejected the login. The account is marked invalid.
    InvalidLogin(String),
    /// Network trouble, unexpected responses. Previous info is kept.
    Transient(anyhow::Error),
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidLogin(reason) => write!(f, "login rejected: {reason}"),
            Self::Transient(e) => write!(f, "transient failure: {e:#}"),
        }
    }
}

impl std::error::Error for FetchError {}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transient(e.into())
    }
}

/// Provider-specific remote status check.
pub trait InfoFetcher: Send + Sync {
    fn fetch<'a>(&'a self, login: &'a str, secret: &'a str, options: &'a Options)
        -> FetchFuture<'a>;
}

/// Shared settings handed to every factory.
#[derive(Debug, Clone, Default)]
pub struct ProviderContext {
    pub refresh: RefreshSettings,
}

/// Builds accounts for one service. Construction must not touch the network.
pub trait AccountFactory: Send + Sync {
    fn service(&self) -> &str;

    fn create(
        &self,
        ctx: &ProviderContext,
        login: &str,
        secret: &str,
        options: Options,
    ) -> Arc<dyn Credential>;
}

/// Factory producing [`ProviderAccount`]s around a shared fetcher.
pub struct FetcherFactory {
    service: String,
    fetcher: Arc<dyn InfoFetcher>,
}

impl FetcherFactory {
    pub fn new(service: impl Into<String>, fetcher: Arc<dyn InfoFetcher>) -> Self {
        Self { service: service.into(), fetcher }
    }
}

impl AccountFactory for FetcherFactory {
    fn service(&self) -> &str {
        &self.service
    }

    fn create(
        &self,
        ctx: &ProviderContext,
        login: &str,
        secret: &str,
        options: Options,
    ) -> Arc<dyn Credential> {
        Arc::new(ProviderAccount::new(
            self.service.clone(),
            login,
            secret,
            options,
            Arc::clone(&self.fetcher),
            ctx.refresh.clone(),
        ))
    }
}

/// Service name to factory lookup table.
#[derive(Default, Clone)]
pub struct ProviderTable {
    factories: HashMap<String, Arc<dyn AccountFactory>>,
}

impl fmt::Debug for ProviderTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderTable").field("services", &self.services()).finish()
    }
}

impl ProviderTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory, replacing any previous one for the same service.
    pub fn register(&mut self, factory: Arc<dyn AccountFactory>) {
        let service = factory.service().to_owned();
        if self.factories.insert(service.clone(), factory).is_some() {
            tracing::debug!(service = %service, "replaced account factory");
        }
    }

    /// Register a [`FetcherFactory`] for `service`.
    pub fn register_fetcher(&mut self, service: impl Into<String>, fetcher: Arc<dyn InfoFetcher>) {
        self.register(Arc::new(FetcherFactory::new(service, fetcher)));
    }

    pub fn get(&self, service: &str) -> Option<&Arc<dyn AccountFactory>> {
        self.factories.get(service)
    }

    /// Registered service names, sorted.
    pub fn services(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// Build a table from provider definitions.
    pub fn from_config(config: &ProvidersConfig) -> anyhow::Result<Self> {
        let mut table = Self::new();
        for spec in &config.providers {
            if table.get(&spec.service).is_some() {
                anyhow::bail!("provider defined twice: {}", spec.service);
            }
            let fetcher: Arc<dyn InfoFetcher> = match &spec.kind {
                ProviderKind::Static => Arc::new(fixed::FixedFetcher),
                ProviderKind::Http { url, premium_header } => {
                    Arc::new(http::HttpFetcher::new(url.clone(), premium_header.clone()))
                }
            };
            table.register_fetcher(spec.service.clone(), fetcher);
        }
        Ok(table)
    }
}

/// Provider definitions file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub providers: Vec<ProviderSpec>,
}

/// One provider definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSpec {
    pub service: String,
    #[serde(flatten)]
    pub kind: ProviderKind,
}

/// How a provider checks its accounts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProviderKind {
    /// No remote check. Accounts are always valid.
    Static,
    /// HTTP GET with basic auth against `url`.
    Http {
        url: String,
        /// Response header whose presence marks a premium account.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        premium_header: Option<String>,
    },
}

/// Load a provider table from a JSON definitions file.
pub fn load_providers(path: &Path) -> anyhow::Result<ProviderTable> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let config: ProvidersConfig =
        serde_json::from_str(&contents).with_context(|| format!("parsing {}", path.display()))?;
    ProviderTable::from_config(&config)
}

#[cfg(test)]
#[path = "provider_tests.rs"]
mod tests;
