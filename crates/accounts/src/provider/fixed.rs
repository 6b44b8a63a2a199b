// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Provider for API-key style services with nothing to check remotely.

use crate::account::{epoch_secs, option_bool, AccountInfo, Options};
use crate::provider::{FetchFuture, InfoFetcher};

/// Reports every account as valid. A truthy `premium` option marks it premium.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedFetcher;

impl InfoFetcher for FixedFetcher {
    fn fetch<'a>(
        &'a self,
        _login: &'a str,
        _secret: &'a str,
        options: &'a Options,
    ) -> FetchFuture<'a> {
        let premium = options.get("premium").and_then(option_bool).unwrap_or(false);
        Box::pin(async move { Ok(AccountInfo { premium, ..AccountInfo::valid(epoch_secs()) }) })
    }
}
