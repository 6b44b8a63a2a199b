// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Account persistence: row format, JSON file backend with atomic writes,
//! and an in-memory backend.

use std::path::{Path, PathBuf};

use anyhow::Context;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::account::{Options, ACTIVATED};

/// One stored account.
///
/// `activated` lives beside the options bag on disk and is folded into the
/// in-memory options under [`ACTIVATED`] on load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRow {
    pub service: String,
    pub login: String,
    pub activated: bool,
    pub secret: String,
    /// JSON-encoded options bag, without `activated`. Empty means no options.
    #[serde(default)]
    pub options: String,
}

/// Durable storage for account rows.
pub trait AccountStore: Send + Sync {
    /// Read every stored row. Only called at startup.
    fn load_all(&self) -> anyhow::Result<Vec<AccountRow>>;

    /// Replace all stored rows with `rows`.
    fn save_all(&self, rows: &[AccountRow]) -> anyhow::Result<()>;

    /// Remove one row. Missing rows are not an error.
    fn delete_row(&self, service: &str, login: &str) -> anyhow::Result<()>;
}

/// Encode an options bag for storage, leaving `activated` out.
pub fn encode_options(options: &Options) -> anyhow::Result<String> {
    let mut stored = options.clone();
    stored.remove(ACTIVATED);
    Ok(serde_json::to_string(&stored)?)
}

/// Decode a stored options bag. Blank input yields an empty bag.
pub fn decode_options(raw: &str) -> anyhow::Result<Options> {
    if raw.trim().is_empty() {
        return Ok(Options::new());
    }
    let value: serde_json::Value = serde_json::from_str(raw)?;
    match value {
        serde_json::Value::Object(map) => Ok(map),
        serde_json::Value::Null => Ok(Options::new()),
        other => anyhow::bail!("options must be a JSON object, got {other}"),
    }
}

/// Resolve the state directory for account data.
///
/// Checks `ACCOUNTS_STATE_DIR`, then `$XDG_STATE_HOME/accounts`,
/// then `$HOME/.local/state/accounts`.
pub fn state_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("ACCOUNTS_STATE_DIR") {
        return PathBuf::from(dir);
    }
    if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
        return PathBuf::from(xdg).join("accounts");
    }
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".local/state/accounts");
    }
    PathBuf::from(".accounts")
}

/// Default location of the account file.
pub fn default_store_path() -> PathBuf {
    state_dir().join("accounts.json")
}

/// On-disk document for [`JsonFileStore`].
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct PersistedAccounts {
    #[serde(default)]
    accounts: Vec<AccountRow>,
}

/// Stores all rows in a single JSON file.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> anyhow::Result<PersistedAccounts> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(PersistedAccounts::default());
            }
            Err(e) => {
                return Err(e).with_context(|| format!("reading {}", self.path.display()));
            }
        };
        if contents.trim().is_empty() {
            return Ok(PersistedAccounts::default());
        }
        serde_json::from_str(&contents).with_context(|| format!("parsing {}", self.path.display()))
    }

    /// Write the document atomically (write tmp + rename).
    ///
    /// Uses a unique temp filename (PID + counter) so concurrent writers never
    /// share a `.tmp` file.
    fn write(&self, doc: &PersistedAccounts) -> anyhow::Result<()> {
        use std::sync::atomic::{AtomicU32, Ordering};
        static COUNTER: AtomicU32 = AtomicU32::new(0);

        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() && !dir.exists() {
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("creating {}", dir.display()))?;
            }
        }

        let json = serde_json::to_string_pretty(doc)?;
        let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
        let tmp_name = format!(
            "{}.{}.{}.tmp",
            self.path.file_name().unwrap_or_default().to_string_lossy(),
            std::process::id(),
            seq,
        );
        let tmp_path = self.path.with_file_name(tmp_name);
        std::fs::write(&tmp_path, json)
            .with_context(|| format!("writing {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("replacing {}", self.path.display()))?;
        Ok(())
    }
}

impl AccountStore for JsonFileStore {
    fn load_all(&self) -> anyhow::Result<Vec<AccountRow>> {
        Ok(self.read()?.accounts)
    }

    fn save_all(&self, rows: &[AccountRow]) -> anyhow::Result<()> {
        self.write(&PersistedAccounts { accounts: rows.to_vec() })
    }

    fn delete_row(&self, service: &str, login: &str) -> anyhow::Result<()> {
        let mut doc = self.read()?;
        let before = doc.accounts.len();
        doc.accounts.retain(|r| !(r.service == service && r.login == login));
        if doc.accounts.len() == before {
            return Ok(());
        }
        self.write(&doc)
    }
}

/// Keeps rows in memory. Nothing survives the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    rows: Mutex<Vec<AccountRow>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rows(rows: Vec<AccountRow>) -> Self {
        Self { rows: Mutex::new(rows) }
    }

    /// Copy of the currently stored rows.
    pub fn rows(&self) -> Vec<AccountRow> {
        self.rows.lock().clone()
    }
}

impl AccountStore for MemoryStore {
    fn load_all(&self) -> anyhow::Result<Vec<AccountRow>> {
        Ok(self.rows())
    }

    fn save_all(&self, rows: &[AccountRow]) -> anyhow::Result<()> {
        *self.rows.lock() = rows.to_vec();
        Ok(())
    }

    fn delete_row(&self, service: &str, login: &str) -> anyhow::Result<()> {
        self.rows.lock().retain(|r| !(r.service == service && r.login == login));
        Ok(())
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
