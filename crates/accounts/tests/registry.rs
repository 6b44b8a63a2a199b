// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end tests driving the account registry through its public API,
//! backed by a JSON file on disk.

use std::ffi::OsString;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderMap, StatusCode};
use axum::routing::get;
use axum::Router;
use clap::Parser;
use serde_json::json;
use tokio::net::TcpListener;

use accounts::account::{Credential, Options};
use accounts::config::AccountsConfig;
use accounts::events::{BroadcastNotifier, RegistryEvent};
use accounts::provider::fixed::FixedFetcher;
use accounts::provider::{InfoFetcher, ProviderContext, ProviderTable};
use accounts::registry::AccountRegistry;
use accounts::store::{AccountRow, AccountStore, JsonFileStore};
use accounts::test_support::{options, wait_until};

fn static_providers(services: &[&str]) -> ProviderTable {
    let mut table = ProviderTable::new();
    for service in services {
        table.register_fetcher(*service, Arc::new(FixedFetcher) as Arc<dyn InfoFetcher>);
    }
    table
}

fn open(path: &Path, notifier: BroadcastNotifier) -> Arc<AccountRegistry> {
    AccountRegistry::new(
        static_providers(&["host1", "host2"]),
        ProviderContext::default(),
        Arc::new(JsonFileStore::new(path)),
        Arc::new(notifier),
    )
}

// -- Scenarios ---------------------------------------------------------------

#[tokio::test]
async fn register_update_remove_round_trip() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("accounts.json");
    let notifier = BroadcastNotifier::new(16);
    let mut events = notifier.subscribe();
    let registry = open(&path, notifier);

    registry.upsert("host1", "alice", Some("p1"), Options::new()).await?;
    assert_eq!(events.recv().await?, RegistryEvent::AccountsUpdated);
    let picked = registry.select_for("host1").await;
    assert_eq!(picked.as_ref().map(|a| a.login()), Some("alice"));

    registry.upsert("host1", "alice", Some("p2"), Options::new()).await?;
    assert_eq!(events.recv().await?, RegistryEvent::AccountsUpdated);
    let stored = JsonFileStore::new(&path).load_all()?;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].secret, "p2");

    assert!(registry.remove("host1", "alice").await?);
    assert_eq!(events.recv().await?, RegistryEvent::AccountsUpdated);
    assert!(registry.select_for("host1").await.is_none());
    assert!(JsonFileStore::new(&path).load_all()?.is_empty());

    // Removing again is quiet.
    assert!(!registry.remove("host1", "alice").await?);
    assert!(events.try_recv().is_err());
    Ok(())
}

#[tokio::test]
async fn restart_restores_accounts() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("state").join("accounts.json");

    let first = open(&path, BroadcastNotifier::default());
    first.upsert("host1", "alice", Some("p1"), options(json!({ "limit": 2, "tags": ["a"] }))).await?;
    first.upsert("host2", "bob", Some("p2"), options(json!({ "activated": false }))).await?;
    drop(first);

    let second = open(&path, BroadcastNotifier::default());
    assert_eq!(second.load().await?, 2);

    let alice = second.get("host1", "alice").await;
    assert_eq!(alice.as_ref().map(|a| a.secret()).as_deref(), Some("p1"));
    assert_eq!(
        alice.map(|a| a.options()),
        Some(options(json!({ "limit": 2, "tags": ["a"], "activated": true })))
    );
    let bob = second.get("host2", "bob").await;
    assert!(bob.is_some_and(|b| !b.activated()));
    assert!(second.select_for("host2").await.is_none());
    Ok(())
}

#[tokio::test]
async fn load_skips_rows_for_unknown_services() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("accounts.json");
    let rows = [
        AccountRow {
            service: "host1".into(),
            login: "alice".into(),
            activated: true,
            secret: "p1".into(),
            options: String::new(),
        },
        AccountRow {
            service: "retired".into(),
            login: "zed".into(),
            activated: true,
            secret: "old".into(),
            options: "{}".into(),
        },
        AccountRow {
            service: "host2".into(),
            login: "bob".into(),
            activated: true,
            secret: "p2".into(),
            options: r#"{"premium":true}"#.into(),
        },
    ];
    JsonFileStore::new(&path).save_all(&rows)?;

    let registry = open(&path, BroadcastNotifier::default());
    assert_eq!(registry.load().await?, 2);
    assert_eq!(registry.len().await, 2);
    assert!(registry.get("retired", "zed").await.is_none());

    registry.refresh_all().await;
    let listing = registry.list_all(false).await;
    let bob = &listing["host2"]["bob"];
    assert!(bob.info.as_ref().is_some_and(|i| i.valid && i.premium));
    Ok(())
}

#[tokio::test]
async fn corrupt_store_fails_load() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("accounts.json");
    std::fs::write(&path, "{ this is not json")?;

    let registry = open(&path, BroadcastNotifier::default());
    let err = registry.load().await.err().map(|e| format!("{e:#}")).unwrap_or_default();
    assert!(err.contains("loading accounts"), "got {err:?}");
    Ok(())
}

// -- HTTP provider -----------------------------------------------------------

/// `alice:p1` in basic auth encoding.
const ALICE_AUTH: &str = "Basic YWxpY2U6cDE=";

async fn mock_provider() -> anyhow::Result<SocketAddr> {
    let app = Router::new().route(
        "/me",
        get(|headers: HeaderMap| async move {
            let authorized = headers
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .is_some_and(|v| v == ALICE_AUTH);
            if authorized {
                (StatusCode::OK, [("x-premium", "yes")])
            } else {
                (StatusCode::FORBIDDEN, [("x-premium", "no")])
            }
        }),
    );
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });
    Ok(addr)
}

fn write_providers(dir: &Path, addr: SocketAddr) -> anyhow::Result<PathBuf> {
    let path = dir.join("providers.json");
    let doc = json!({
        "providers": [
            { "service": "vault", "kind": "http", "url": format!("http://{addr}/me"), "premium_header": "x-premium" },
            { "service": "mirror", "kind": "static" },
        ]
    });
    std::fs::write(&path, serde_json::to_vec_pretty(&doc)?)?;
    Ok(path)
}

#[tokio::test]
async fn http_provider_checks_accounts_in_background() -> anyhow::Result<()> {
    let addr = mock_provider().await?;
    let dir = tempfile::tempdir()?;
    let providers = accounts::provider::load_providers(&write_providers(dir.path(), addr)?)?;
    assert_eq!(providers.services(), ["mirror", "vault"]);

    let registry = AccountRegistry::new(
        providers,
        ProviderContext::default(),
        Arc::new(JsonFileStore::new(dir.path().join("accounts.json"))),
        Arc::new(BroadcastNotifier::default()),
    );
    registry.upsert("vault", "alice", Some("p1"), Options::new()).await?;
    registry.upsert("vault", "mallory", Some("guess"), Options::new()).await?;

    // Listing schedules the first check for accounts without info.
    let _ = registry.list_all(false).await;
    let checked = wait_until(|| {
        let registry = Arc::clone(&registry);
        async move {
            let listing = registry.list_all(false).await;
            listing["vault"].values().all(|snap| snap.info.is_some())
        }
    })
    .await;
    assert!(checked);

    let listing = registry.list_all(false).await;
    assert!(listing["vault"]["alice"].usable);
    assert!(listing["vault"]["alice"].info.as_ref().is_some_and(|i| i.premium));
    assert!(!listing["vault"]["mallory"].usable);

    for _ in 0..20 {
        let picked = registry.select_for("vault").await;
        assert_eq!(picked.as_ref().map(|a| a.login()), Some("alice"));
    }
    Ok(())
}

#[tokio::test]
async fn run_lists_stored_accounts() -> anyhow::Result<()> {
    let addr = mock_provider().await?;
    let dir = tempfile::tempdir()?;
    let providers = write_providers(dir.path(), addr)?;
    let store = dir.path().join("accounts.json");
    JsonFileStore::new(&store).save_all(&[AccountRow {
        service: "vault".into(),
        login: "alice".into(),
        activated: true,
        secret: "p1".into(),
        options: String::new(),
    }])?;

    let config = AccountsConfig::parse_from([
        OsString::from("accounts"),
        "--store-path".into(),
        store.into_os_string(),
        "--providers".into(),
        providers.into_os_string(),
        "--refresh".into(),
    ]);
    let listing = tokio::time::timeout(Duration::from_secs(10), accounts::run(config)).await??;

    let alice = &listing["vault"]["alice"];
    assert!(alice.usable);
    assert!(alice.info.as_ref().is_some_and(|i| i.valid && i.premium));

    let rendered = serde_json::to_value(&listing)?;
    assert_eq!(rendered["vault"]["alice"]["options"], json!({ "activated": true }));
    assert!(rendered["vault"]["alice"].get("secret").is_none());
    Ok(())
}

#[tokio::test]
async fn run_rejects_bad_providers_file() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let providers = dir.path().join("providers.json");
    std::fs::write(&providers, r#"{"providers":[{"service":"x","kind":"carrier-pigeon"}]}"#)?;

    let config = AccountsConfig::parse_from([
        OsString::from("accounts"),
        "--store-path".into(),
        dir.path().join("accounts.json").into_os_string(),
        "--providers".into(),
        providers.into_os_string(),
    ]);
    let err = accounts::run(config).await.err().map(|e| format!("{e:#}")).unwrap_or_default();
    assert!(err.contains("parsing"), "got {err:?}");
    Ok(())
}
