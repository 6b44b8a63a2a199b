// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test infrastructure: fake providers, a recording notifier, and a
//! registry builder.

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::account::refresh::RefreshSettings;
use crate::account::{epoch_secs, AccountInfo, Options};
use crate::events::{ChangeNotifier, RegistryEvent};
use crate::provider::{FetchError, FetchFuture, InfoFetcher, ProviderContext, ProviderTable};
use crate::registry::AccountRegistry;
use crate::store::{AccountStore, MemoryStore};

/// What a [`ScriptedFetcher`] reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    Valid,
    Premium,
    Expired,
    Invalid,
    Transient,
}

/// Fetcher with a switchable outcome and a call counter.
///
/// With a gate installed, every fetch waits for [`ScriptedFetcher::release`]
/// before returning.
pub struct ScriptedFetcher {
    outcome: Mutex<FetchOutcome>,
    calls: AtomicU32,
    gate: Option<Arc<Notify>>,
    seen_secrets: Mutex<Vec<String>>,
}

impl ScriptedFetcher {
    pub fn new(outcome: FetchOutcome) -> Arc<Self> {
        Arc::new(Self {
            outcome: Mutex::new(outcome),
            calls: AtomicU32::new(0),
            gate: None,
            seen_secrets: Mutex::new(Vec::new()),
        })
    }

    /// A fetcher whose fetches block until released.
    pub fn gated(outcome: FetchOutcome) -> Arc<Self> {
        Arc::new(Self {
            outcome: Mutex::new(outcome),
            calls: AtomicU32::new(0),
            gate: Some(Arc::new(Notify::new())),
            seen_secrets: Mutex::new(Vec::new()),
        })
    }

    pub fn set_outcome(&self, outcome: FetchOutcome) {
        *self.outcome.lock() = outcome;
    }

    /// Number of fetches started.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Secrets passed to each fetch, in order.
    pub fn seen_secrets(&self) -> Vec<String> {
        self.seen_secrets.lock().clone()
    }

    /// Let one gated fetch finish.
    pub fn release(&self) {
        if let Some(ref gate) = self.gate {
            gate.notify_one();
        }
    }
}

impl InfoFetcher for ScriptedFetcher {
    fn fetch<'a>(
        &'a self,
        _login: &'a str,
        secret: &'a str,
        _options: &'a Options,
    ) -> FetchFuture<'a> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen_secrets.lock().push(secret.to_owned());
        Box::pin(async move {
            if let Some(ref gate) = self.gate {
                gate.notified().await;
            }
            let now = epoch_secs();
            let outcome = *self.outcome.lock();
            match outcome {
                FetchOutcome::Valid => Ok(AccountInfo::valid(now)),
                FetchOutcome::Premium => Ok(AccountInfo { premium: true, ..AccountInfo::valid(now) }),
                FetchOutcome::Expired => {
                    Ok(AccountInfo { valid_until: Some(now.saturating_sub(60)), ..AccountInfo::valid(now) })
                }
                FetchOutcome::Invalid => Err(FetchError::InvalidLogin("rejected".to_owned())),
                FetchOutcome::Transient => Err(FetchError::Transient(anyhow::anyhow!("connection reset"))),
            }
        })
    }
}

/// Notifier that records every event.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<RegistryEvent>>,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn count(&self) -> usize {
        self.events.lock().len()
    }

    pub fn events(&self) -> Vec<RegistryEvent> {
        self.events.lock().clone()
    }
}

impl ChangeNotifier for RecordingNotifier {
    fn notify(&self, event: RegistryEvent) {
        self.events.lock().push(event);
    }
}

/// Refresh settings with short backoff for tests.
pub fn fast_refresh() -> RefreshSettings {
    RefreshSettings {
        info_threshold: Duration::from_secs(600),
        initial_backoff: Duration::from_millis(10),
        max_backoff: Duration::from_millis(100),
    }
}

/// Registry wired to in-memory collaborators, plus handles to inspect them.
pub struct TestRegistry {
    pub registry: Arc<AccountRegistry>,
    pub store: Arc<MemoryStore>,
    pub notifier: Arc<RecordingNotifier>,
    pub fetcher: Arc<ScriptedFetcher>,
}

/// Builder for constructing an [`AccountRegistry`] in tests.
pub struct RegistryBuilder {
    services: Vec<String>,
    fetcher: Arc<ScriptedFetcher>,
    store: Arc<MemoryStore>,
}

impl Default for RegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self {
            services: vec!["host1".to_owned(), "host2".to_owned()],
            fetcher: ScriptedFetcher::new(FetchOutcome::Valid),
            store: Arc::new(MemoryStore::new()),
        }
    }

    /// Services with a registered provider. Defaults to `host1` and `host2`.
    pub fn services(mut self, services: &[&str]) -> Self {
        self.services = services.iter().map(|s| (*s).to_owned()).collect();
        self
    }

    pub fn fetcher(mut self, fetcher: Arc<ScriptedFetcher>) -> Self {
        self.fetcher = fetcher;
        self
    }

    pub fn store(mut self, store: Arc<MemoryStore>) -> Self {
        self.store = store;
        self
    }

    pub fn build(self) -> TestRegistry {
        let mut providers = ProviderTable::new();
        for service in &self.services {
            providers.register_fetcher(service.clone(), Arc::clone(&self.fetcher) as Arc<dyn InfoFetcher>);
        }
        let notifier = RecordingNotifier::new();
        let registry = AccountRegistry::new(
            providers,
            ProviderContext { refresh: fast_refresh() },
            Arc::clone(&self.store) as Arc<dyn AccountStore>,
            Arc::clone(&notifier) as Arc<dyn ChangeNotifier>,
        );
        TestRegistry { registry, store: self.store, notifier, fetcher: self.fetcher }
    }
}

/// Build an options bag from JSON object literal syntax.
pub fn options(value: serde_json::Value) -> Options {
    match value {
        serde_json::Value::Object(map) => map,
        _ => Options::new(),
    }
}

/// Poll `check` until it holds or two seconds pass. Returns the final result.
pub async fn wait_until<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check().await
}

/// Let spawned tasks run for a moment.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

/// Assert that an expression returns `Err` whose message contains a substring.
#[macro_export]
macro_rules! assert_err_contains {
    ($expr:expr, $substr:expr) => {{
        let result = $expr;
        let err = result.expect_err(concat!("expected Err for: ", stringify!($expr)));
        let msg = format!("{err:#}");
        assert!(msg.contains($substr), "expected error containing {:?}, got: {msg:?}", $substr);
    }};
}
