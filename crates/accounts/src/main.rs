// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;
use tracing::error;

use accounts::config::AccountsConfig;

#[tokio::main]
async fn main() {
    let config = AccountsConfig::parse();
    accounts::init_tracing(&config);

    let listing = match accounts::run(config).await {
        Ok(listing) => listing,
        Err(e) => {
            error!("fatal: {e:#}");
            std::process::exit(1);
        }
    };

    match serde_json::to_string_pretty(&listing) {
        Ok(json) => println!("{json}"),
        Err(e) => {
            error!("fatal: encoding listing: {e}");
            std::process::exit(1);
        }
    }
}
