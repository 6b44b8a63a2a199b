// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Account refresh with failure backoff.
//!
//! At most one fetch per account is in flight. A forced request arriving
//! mid-flight queues exactly one rerun, and callers awaiting a refresh join the
//! running job until it settles. Jobs hold only a weak handle to the account
//! state, so an account removed mid-flight drops the result. A job dropped
//! before it settles, cancelled or panicked, releases the in-flight mark.

use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::account::{epoch_secs, AccountInfo, AccountState, Options};
use crate::provider::{FetchError, InfoFetcher};

/// Default age after which cached info is considered stale.
pub const DEFAULT_INFO_THRESHOLD: Duration = Duration::from_secs(600);

/// Initial backoff after a failed refresh.
pub const INITIAL_BACKOFF: Duration = Duration::from_secs(1);

/// Maximum backoff after repeated failed refreshes.
pub const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Tuning for non-forced refreshes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshSettings {
    /// Cached info younger than this is reused.
    pub info_threshold: Duration,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self {
            info_threshold: DEFAULT_INFO_THRESHOLD,
            initial_backoff: INITIAL_BACKOFF,
            max_backoff: MAX_BACKOFF,
        }
    }
}

impl RefreshSettings {
    /// Backoff to wait after `failures` consecutive failures.
    pub fn backoff(&self, failures: u32) -> Duration {
        let factor = 2u32.saturating_pow(failures.saturating_sub(1));
        self.initial_backoff.saturating_mul(factor).min(self.max_backoff)
    }
}

/// Bookkeeping for in-flight refreshes and backoff.
#[derive(Debug)]
pub(crate) struct RefreshState {
    pub(crate) in_flight: bool,
    /// A forced refresh was requested while one was in flight.
    pub(crate) rerun: bool,
    pub(crate) failures: u32,
    pub(crate) retry_at: Option<Instant>,
    /// Bumped each time an in-flight refresh settles.
    settled_tx: watch::Sender<u64>,
}

impl Default for RefreshState {
    fn default() -> Self {
        Self {
            in_flight: false,
            rerun: false,
            failures: 0,
            retry_at: None,
            settled_tx: watch::Sender::new(0),
        }
    }
}

pub(crate) enum Decision {
    Start,
    /// A refresh is already running. The receiver changes once it settles.
    Join(watch::Receiver<u64>),
    Skip(&'static str),
}

impl RefreshState {
    /// Decide whether a refresh starts now. Marks it in flight if so.
    pub(crate) fn decide(
        &mut self,
        settings: &RefreshSettings,
        info: Option<&AccountInfo>,
        force: bool,
        now: Instant,
        epoch: u64,
    ) -> Decision {
        if self.in_flight {
            if force {
                self.rerun = true;
            }
            return Decision::Join(self.settled_tx.subscribe());
        }
        if !force {
            if self.retry_at.is_some_and(|at| now < at) {
                return Decision::Skip("backing off after failure");
            }
            if info.is_some_and(|i| i.age(epoch) < settings.info_threshold) {
                return Decision::Skip("info is fresh");
            }
        }
        self.in_flight = true;
        Decision::Start
    }

    /// Clear the in-flight mark and wake every joined caller.
    pub(crate) fn settle(&mut self) {
        self.in_flight = false;
        self.rerun = false;
        self.settled_tx.send_modify(|n| *n = n.wrapping_add(1));
    }

    pub(crate) fn reset_backoff(&mut self) {
        self.failures = 0;
        self.retry_at = None;
    }

    fn record_failure(&mut self, settings: &RefreshSettings) -> Duration {
        self.failures = self.failures.saturating_add(1);
        let wait = settings.backoff(self.failures);
        self.retry_at = Some(Instant::now() + wait);
        wait
    }
}

/// Outcome of applying one fetch result.
enum Applied {
    Done,
    Again,
}

/// A refresh that has been admitted. Settles the account's refresh state
/// when it finishes or is dropped.
pub(crate) struct RefreshJob {
    state: Weak<Mutex<AccountState>>,
    fetcher: Arc<dyn InfoFetcher>,
    service: String,
    login: String,
    settings: RefreshSettings,
    settled: bool,
}

impl RefreshJob {
    pub(crate) fn new(
        state: Weak<Mutex<AccountState>>,
        fetcher: Arc<dyn InfoFetcher>,
        service: String,
        login: String,
        settings: RefreshSettings,
    ) -> Self {
        Self { state, fetcher, service, login, settings, settled: false }
    }

    pub(crate) async fn run(mut self) {
        loop {
            let Some((secret, options, generation)) = self.inputs() else {
                self.settled = true;
                return;
            };
            let result = self.fetcher.fetch(&self.login, &secret, &options).await;
            match self.apply(result, generation) {
                Applied::Again => continue,
                Applied::Done => {
                    self.settled = true;
                    return;
                }
            }
        }
    }

    /// Release the in-flight mark without fetching.
    pub(crate) fn abandon(self) {
        drop(self);
    }

    fn inputs(&self) -> Option<(String, Options, u64)> {
        let Some(state) = self.state.upgrade() else {
            debug!(service = %self.service, login = %self.login, "account removed before refresh");
            return None;
        };
        let state = state.lock();
        Some((state.secret.clone(), state.options.clone(), state.generation))
    }

    fn apply(&self, result: Result<AccountInfo, FetchError>, generation: u64) -> Applied {
        let Some(state) = self.state.upgrade() else {
            debug!(
                service = %self.service,
                login = %self.login,
                "account removed during refresh, result discarded"
            );
            return Applied::Done;
        };
        let mut state = state.lock();

        if state.generation != generation {
            debug!(service = %self.service, login = %self.login, "account changed during refresh, fetching again");
            state.refresh.rerun = false;
            return Applied::Again;
        }

        match result {
            Ok(info) => {
                debug!(service = %self.service, login = %self.login, valid = info.valid, "account info refreshed");
                state.info = Some(info);
                state.refresh.reset_backoff();
            }
            Err(FetchError::InvalidLogin(reason)) => {
                warn!(service = %self.service, login = %self.login, reason = %reason, "account login rejected");
                state.info = Some(AccountInfo::invalid(epoch_secs()));
                state.refresh.reset_backoff();
            }
            Err(FetchError::Transient(e)) => {
                let wait = state.refresh.record_failure(&self.settings);
                warn!(
                    service = %self.service,
                    login = %self.login,
                    err = %e,
                    retry_in_secs = wait.as_secs(),
                    "account refresh failed"
                );
            }
        }

        if std::mem::take(&mut state.refresh.rerun) {
            return Applied::Again;
        }
        state.refresh.settle();
        Applied::Done
    }
}

impl Drop for RefreshJob {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        if let Some(state) = self.state.upgrade() {
            debug!(service = %self.service, login = %self.login, "refresh stopped before settling");
            state.lock().refresh.settle();
        }
    }
}
