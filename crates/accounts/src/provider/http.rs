// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Provider that checks a login with an authenticated HTTP request.

use std::time::Duration;

use reqwest::{Client, StatusCode};

use crate::account::{epoch_secs, AccountInfo, Options};
use crate::provider::{FetchError, FetchFuture, InfoFetcher};

/// Per-request timeout for status checks.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// `GET url` with basic auth: 2xx is valid, 401/403 is a rejected login,
/// anything else is transient.
pub struct HttpFetcher {
    url: String,
    premium_header: Option<String>,
    client: Client,
}

impl HttpFetcher {
    pub fn new(url: String, premium_header: Option<String>) -> Self {
        crate::ensure_crypto_provider();
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build().unwrap_or_default();
        Self { url, premium_header, client }
    }

    async fn check(&self, login: &str, secret: &str) -> Result<AccountInfo, FetchError> {
        let resp = self.client.get(&self.url).basic_auth(login, Some(secret)).send().await?;
        let status = resp.status();

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(FetchError::InvalidLogin(format!("{status}")));
        }
        if !status.is_success() {
            return Err(FetchError::Transient(anyhow::anyhow!("unexpected status {status}")));
        }

        let premium = self
            .premium_header
            .as_deref()
            .is_some_and(|name| resp.headers().contains_key(name));
        Ok(AccountInfo { premium, ..AccountInfo::valid(epoch_secs()) })
    }
}

impl InfoFetcher for HttpFetcher {
    fn fetch<'a>(
        &'a self,
        login: &'a str,
        secret: &'a str,
        _options: &'a Options,
    ) -> FetchFuture<'a> {
        Box::pin(self.check(login, secret))
    }
}
