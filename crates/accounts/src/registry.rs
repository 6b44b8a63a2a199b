// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Account registry: every known account, grouped by service.
//!
//! A single mutex guards the whole map. Every public operation holds it for
//! its full duration, including the write to the store and the change
//! notification, so observers never see a half-applied mutation. Remote
//! refreshes never run under the lock.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use anyhow::Context;
use rand::seq::IndexedRandom;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::account::{AccountSnapshot, Credential, Options, ACTIVATED};
use crate::events::{ChangeNotifier, RegistryEvent};
use crate::provider::{ProviderContext, ProviderTable};
use crate::store::{decode_options, encode_options, AccountRow, AccountStore};

/// Accounts of one service, keyed by login.
type ServiceAccounts = HashMap<String, Arc<dyn Credential>>;

/// All accounts, keyed by service.
type AccountMap = HashMap<String, ServiceAccounts>;

/// Snapshot of every account, keyed by service then login.
pub type AccountListing = BTreeMap<String, BTreeMap<String, AccountSnapshot>>;

/// Lock-guarded store of all accounts.
pub struct AccountRegistry {
    accounts: Mutex<AccountMap>,
    providers: ProviderTable,
    ctx: ProviderContext,
    store: Arc<dyn AccountStore>,
    notifier: Arc<dyn ChangeNotifier>,
}

impl AccountRegistry {
    /// Create an empty registry. Call [`load`](Self::load) to populate it.
    pub fn new(
        providers: ProviderTable,
        ctx: ProviderContext,
        store: Arc<dyn AccountStore>,
        notifier: Arc<dyn ChangeNotifier>,
    ) -> Arc<Self> {
        Arc::new(Self { accounts: Mutex::new(HashMap::new()), providers, ctx, store, notifier })
    }

    pub fn providers(&self) -> &ProviderTable {
        &self.providers
    }

    /// Replace the in-memory accounts with the stored rows.
    ///
    /// Rows for unknown services are skipped with a warning. Duplicate rows
    /// abort the load and leave the registry untouched. Returns the number of
    /// accounts loaded. Does not notify.
    pub async fn load(&self) -> anyhow::Result<usize> {
        let mut accounts = self.accounts.lock().await;
        let rows = self.store.load_all().context("loading accounts")?;

        let mut loaded = AccountMap::new();
        let mut count = 0;
        for row in rows {
            let exists =
                loaded.get(&row.service).is_some_and(|group| group.contains_key(&row.login));
            if exists {
                anyhow::bail!("duplicate stored account {}:{}", row.service, row.login);
            }

            let mut options = decode_options(&row.options).unwrap_or_else(|e| {
                warn!(service = %row.service, login = %row.login, err = %e, "ignoring malformed account options");
                Options::new()
            });
            options.insert(ACTIVATED.to_owned(), serde_json::Value::Bool(row.activated));

            if self.create(&mut loaded, &row.service, &row.login, &row.secret, options) {
                count += 1;
            }
        }

        *accounts = loaded;
        info!(accounts = count, services = accounts.len(), "accounts loaded");
        Ok(count)
    }

    /// Write every account to the store.
    pub async fn save(&self) -> anyhow::Result<()> {
        let accounts = self.accounts.lock().await;
        self.persist(&accounts)
    }

    /// Add an account, or update it if `(service, login)` already exists.
    ///
    /// An update that changes anything forces a background refresh of that
    /// account. Unknown services are skipped with a warning. The store is
    /// written and observers are notified either way.
    pub async fn upsert(
        &self,
        service: &str,
        login: &str,
        secret: Option<&str>,
        options: Options,
    ) -> anyhow::Result<()> {
        let mut accounts = self.accounts.lock().await;

        let existing = accounts.get(service).and_then(|group| group.get(login)).cloned();
        match existing {
            Some(account) => {
                let changed = account.update(secret, &options);
                self.persist(&accounts)?;
                if changed {
                    debug!(service, login, "account changed, forcing refresh");
                    account.schedule_refresh(true);
                }
            }
            None => {
                self.create(&mut accounts, service, login, secret.unwrap_or_default(), options);
                self.persist(&accounts)?;
            }
        }

        self.notifier.notify(RegistryEvent::AccountsUpdated);
        Ok(())
    }

    /// Remove an account. Returns whether it existed.
    ///
    /// Only the removed row is deleted from the store. Removing a missing
    /// account is a no-op and does not notify.
    pub async fn remove(&self, service: &str, login: &str) -> anyhow::Result<bool> {
        let mut accounts = self.accounts.lock().await;

        let removed = accounts.get_mut(service).and_then(|group| group.remove(login));
        if removed.is_none() {
            debug!(service, login, "remove of unknown account, nothing to do");
            return Ok(false);
        }
        if accounts.get(service).is_some_and(HashMap::is_empty) {
            accounts.remove(service);
        }

        self.store
            .delete_row(service, login)
            .with_context(|| format!("deleting account {service}:{login}"))?;
        self.notifier.notify(RegistryEvent::AccountsUpdated);
        Ok(true)
    }

    /// Pick a usable account for `service`, uniformly at random.
    ///
    /// `None` when the service is unknown or has no usable account.
    pub async fn select_for(&self, service: &str) -> Option<Arc<dyn Credential>> {
        let accounts = self.accounts.lock().await;
        let candidates: Vec<&Arc<dyn Credential>> =
            accounts.get(service)?.values().filter(|a| a.is_usable()).collect();
        candidates.choose(&mut rand::rng()).map(|a| Arc::clone(a))
    }

    /// Look up one account.
    pub async fn get(&self, service: &str, login: &str) -> Option<Arc<dyn Credential>> {
        let accounts = self.accounts.lock().await;
        accounts.get(service).and_then(|group| group.get(login)).cloned()
    }

    /// Snapshot every account.
    ///
    /// With `refresh_first`, a full refresh is started in the background and
    /// the current, possibly stale, data is returned without waiting for it.
    /// Accounts without cached info get a non-forced refresh scheduled.
    pub async fn list_all(self: &Arc<Self>, refresh_first: bool) -> AccountListing {
        if refresh_first {
            let registry = Arc::clone(self);
            tokio::spawn(async move {
                registry.refresh_all().await;
            });
        }

        let accounts = self.accounts.lock().await;
        let mut listing = AccountListing::new();
        for (service, group) in accounts.iter() {
            let entries = listing.entry(service.clone()).or_default();
            for (login, account) in group {
                account.ensure_info();
                entries.insert(login.clone(), account.snapshot());
            }
        }
        listing
    }

    /// Force a refresh of every account and wait for all of them.
    ///
    /// Accounts are collected under the lock, which is released before any
    /// remote call starts.
    pub async fn refresh_all(&self) {
        let snapshot: Vec<Arc<dyn Credential>> = {
            let accounts = self.accounts.lock().await;
            accounts.values().flat_map(|group| group.values().cloned()).collect()
        };
        debug!(accounts = snapshot.len(), "refreshing all accounts");
        futures_util::future::join_all(snapshot.iter().map(|a| a.refresh(true))).await;
    }

    /// Number of accounts across all services.
    pub async fn len(&self) -> usize {
        self.accounts.lock().await.values().map(HashMap::len).sum()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Build an account through its service's factory and insert it.
    ///
    /// Returns `false` if the service has no factory.
    fn create(
        &self,
        accounts: &mut AccountMap,
        service: &str,
        login: &str,
        secret: &str,
        options: Options,
    ) -> bool {
        let Some(factory) = self.providers.get(service) else {
            warn!(service, login, "unknown account provider, skipping account");
            return false;
        };
        debug!(service, login, "creating account");
        let account = factory.create(&self.ctx, login, secret, options);
        accounts.entry(service.to_owned()).or_default().insert(login.to_owned(), account);
        true
    }

    fn persist(&self, accounts: &AccountMap) -> anyhow::Result<()> {
        let rows = to_rows(accounts)?;
        self.store.save_all(&rows).context("saving accounts")
    }
}

/// Flatten the map into store rows, sorted by service then login.
fn to_rows(accounts: &AccountMap) -> anyhow::Result<Vec<AccountRow>> {
    let mut rows = Vec::with_capacity(accounts.values().map(HashMap::len).sum());
    for (service, group) in accounts {
        for (login, account) in group {
            let options = account.options();
            rows.push(AccountRow {
                service: service.clone(),
                login: login.clone(),
                activated: account.activated(),
                secret: account.secret(),
                options: encode_options(&options)?,
            });
        }
    }
    rows.sort_by(|a, b| (&a.service, &a.login).cmp(&(&b.service, &b.login)));
    Ok(rows)
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
