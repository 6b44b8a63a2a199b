// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Accounts: the capability contract every provider account implements, plus
//! the generic account backed by a provider's [`InfoFetcher`].
//!
//! Accounts are shared as `Arc<dyn Credential>` and mutate through `&self`.
//! Mutable state sits behind a short-lived `parking_lot` lock that is never
//! held across an `.await`, so remote checks run without blocking readers.

pub mod refresh;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::account::refresh::{Decision, RefreshJob, RefreshSettings, RefreshState};
use crate::provider::InfoFetcher;

/// Free-form per-account options. Always carries [`ACTIVATED`].
pub type Options = serde_json::Map<String, Value>;

/// Option key holding the activation flag.
pub const ACTIVATED: &str = "activated";

/// Future returned by [`Credential::refresh`].
pub type RefreshFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// Remote status of an account, as last reported by its provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountInfo {
    /// Whether the provider accepted the login.
    pub valid: bool,
    pub premium: bool,
    /// Account expiry as epoch seconds. `None` means no expiry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_until: Option<u64>,
    /// Remaining traffic in bytes. `None` means unlimited or unknown.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traffic_left: Option<u64>,
    /// When the info was fetched, epoch seconds.
    pub checked_at: u64,
}

impl AccountInfo {
    pub fn valid(checked_at: u64) -> Self {
        Self { valid: true, premium: false, valid_until: None, traffic_left: None, checked_at }
    }

    pub fn invalid(checked_at: u64) -> Self {
        Self { valid: false, ..Self::valid(checked_at) }
    }

    pub fn is_expired(&self, now: u64) -> bool {
        self.valid_until.is_some_and(|until| until <= now)
    }

    /// Whether an account with this info may be handed out.
    pub fn is_usable(&self, now: u64) -> bool {
        self.valid && !self.is_expired(now) && self.traffic_left != Some(0)
    }

    pub fn age(&self, now: u64) -> Duration {
        Duration::from_secs(now.saturating_sub(self.checked_at))
    }
}

/// Serializable view of one account, without its secret.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub service: String,
    pub login: String,
    pub activated: bool,
    pub usable: bool,
    pub options: Options,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<AccountInfo>,
}

/// Capabilities the registry needs from a provider account.
pub trait Credential: Send + Sync {
    /// Service this account authenticates against.
    fn service(&self) -> &str;

    /// Login name, unique within the service.
    fn login(&self) -> &str;

    fn secret(&self) -> String;

    /// Current options, including [`ACTIVATED`].
    fn options(&self) -> Options;

    fn activated(&self) -> bool {
        self.options().get(ACTIVATED).and_then(option_bool).unwrap_or(true)
    }

    /// Last known remote status, if any.
    fn info(&self) -> Option<AccountInfo>;

    /// Apply a new secret and/or a partial options bag.
    ///
    /// Returns `true` if anything actually changed. Never touches the network.
    fn update(&self, secret: Option<&str>, options: &Options) -> bool;

    /// Whether this account may be selected right now. Never blocks.
    fn is_usable(&self) -> bool;

    /// Make sure remote info gets populated if none is cached yet.
    fn ensure_info(&self);

    /// Request a background refresh. `force` bypasses freshness and backoff.
    fn schedule_refresh(&self, force: bool);

    /// Refresh in the caller's task and resolve once done.
    ///
    /// If a refresh is already running, waits for it (and any rerun a forced
    /// request queued) to settle instead of starting another.
    fn refresh(&self, force: bool) -> RefreshFuture<'_>;

    fn snapshot(&self) -> AccountSnapshot {
        AccountSnapshot {
            service: self.service().to_owned(),
            login: self.login().to_owned(),
            activated: self.activated(),
            usable: self.is_usable(),
            options: self.options(),
            info: self.info(),
        }
    }
}

/// Mutable part of a [`ProviderAccount`].
pub(crate) struct AccountState {
    pub(crate) secret: String,
    pub(crate) options: Options,
    pub(crate) info: Option<AccountInfo>,
    /// Bumped whenever secret or options change, so stale fetches are ignored.
    pub(crate) generation: u64,
    pub(crate) refresh: RefreshState,
}

/// What a refresh request turned into.
enum Admission {
    Run(RefreshJob),
    Join(watch::Receiver<u64>),
    Skipped,
}

/// Account whose remote status comes from a provider's [`InfoFetcher`].
pub struct ProviderAccount {
    service: String,
    login: String,
    state: Arc<Mutex<AccountState>>,
    fetcher: Arc<dyn InfoFetcher>,
    settings: RefreshSettings,
}

impl ProviderAccount {
    pub fn new(
        service: impl Into<String>,
        login: impl Into<String>,
        secret: impl Into<String>,
        options: Options,
        fetcher: Arc<dyn InfoFetcher>,
        settings: RefreshSettings,
    ) -> Self {
        Self {
            service: service.into(),
            login: login.into(),
            state: Arc::new(Mutex::new(AccountState {
                secret: secret.into(),
                options: normalize_options(options),
                info: None,
                generation: 0,
                refresh: RefreshState::default(),
            })),
            fetcher,
            settings,
        }
    }

    fn prepare_refresh(&self, force: bool) -> Admission {
        let decision = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            state.refresh.decide(
                &self.settings,
                state.info.as_ref(),
                force,
                Instant::now(),
                epoch_secs(),
            )
        };
        match decision {
            Decision::Start => Admission::Run(RefreshJob::new(
                Arc::downgrade(&self.state),
                Arc::clone(&self.fetcher),
                self.service.clone(),
                self.login.clone(),
                self.settings.clone(),
            )),
            Decision::Join(rx) => {
                debug!(service = %self.service, login = %self.login, force, "account refresh already in flight");
                Admission::Join(rx)
            }
            Decision::Skip(reason) => {
                debug!(service = %self.service, login = %self.login, reason, "account refresh skipped");
                Admission::Skipped
            }
        }
    }
}

impl Credential for ProviderAccount {
    fn service(&self) -> &str {
        &self.service
    }

    fn login(&self) -> &str {
        &self.login
    }

    fn secret(&self) -> String {
        self.state.lock().secret.clone()
    }

    fn options(&self) -> Options {
        self.state.lock().options.clone()
    }

    fn info(&self) -> Option<AccountInfo> {
        self.state.lock().info.clone()
    }

    fn update(&self, secret: Option<&str>, options: &Options) -> bool {
        let mut state = self.state.lock();
        let mut changed = false;

        if let Some(secret) = secret {
            if state.secret != secret {
                state.secret = secret.to_owned();
                // The old verdict described the old secret.
                state.info = None;
                state.refresh.reset_backoff();
                changed = true;
            }
        }

        for (key, value) in options {
            let value = if key == ACTIVATED {
                match option_bool(value) {
                    Some(flag) => Value::Bool(flag),
                    None => {
                        warn!(service = %self.service, login = %self.login, value = %value, "ignoring unrecognized activated flag");
                        continue;
                    }
                }
            } else {
                value.clone()
            };
            if state.options.get(key) != Some(&value) {
                state.options.insert(key.clone(), value);
                changed = true;
            }
        }

        if changed {
            state.generation += 1;
        }
        changed
    }

    fn is_usable(&self) -> bool {
        let state = self.state.lock();
        let activated = state.options.get(ACTIVATED).and_then(option_bool).unwrap_or(true);
        activated && state.info.as_ref().map_or(true, |info| info.is_usable(epoch_secs()))
    }

    fn ensure_info(&self) {
        let missing = self.state.lock().info.is_none();
        if missing {
            self.schedule_refresh(false);
        }
    }

    fn schedule_refresh(&self, force: bool) {
        let Admission::Run(job) = self.prepare_refresh(force) else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(job.run());
            }
            Err(_) => {
                debug!(service = %self.service, login = %self.login, "no async runtime, refresh not scheduled");
                job.abandon();
            }
        }
    }

    fn refresh(&self, force: bool) -> RefreshFuture<'_> {
        let admission = self.prepare_refresh(force);
        Box::pin(async move {
            match admission {
                Admission::Run(job) => job.run().await,
                Admission::Join(mut rx) => {
                    // Err means the account was dropped. Nothing left to wait for.
                    let _ = rx.changed().await;
                }
                Admission::Skipped => {}
            }
        })
    }
}

/// Ensure the options bag carries a boolean [`ACTIVATED`], defaulting to on.
pub fn normalize_options(mut options: Options) -> Options {
    let activated = options.get(ACTIVATED).and_then(option_bool).unwrap_or(true);
    options.insert(ACTIVATED.to_owned(), Value::Bool(activated));
    options
}

/// Interpret a loosely typed option value as a flag.
pub fn option_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|f| f != 0.0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Some(true),
            "false" | "0" | "no" | "off" | "" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

pub(crate) fn epoch_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

#[cfg(test)]
#[path = "account_tests.rs"]
mod tests;
