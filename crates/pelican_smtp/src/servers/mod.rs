// SPDX-FileCopyrightText: 2024 The pelican developers
//
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use pelican_core::{accounts::Accounts, api::DirectoryClient, config::Config, events::EventChannel};
use pelican_deps::{
    color_eyre,
    tokio,
    tokio_util::sync::CancellationToken,
    tracing::{self, instrument},
};

pub(crate) mod state;

/// The plain TCP submission server. TLS termination is left to an outer
/// layer; the gateway binds loopback by default.
pub mod unencrypted;

/// Starts the smtp server
///
/// # Errors
///
/// Returns an error if the server startup fails
#[instrument(skip(config, accounts, client, events, shutdown_flag))]
pub async fn start(
    config: Arc<Config>,
    accounts: Arc<Accounts>,
    client: Arc<dyn DirectoryClient>,
    events: EventChannel,
    shutdown_flag: CancellationToken,
) -> color_eyre::eyre::Result<()> {
    tokio::spawn(async move {
        if let Err(e) =
            unencrypted::Unencrypted::run(config, accounts, client, events, shutdown_flag).await
        {
            panic!("SMTP listener failed to start: {e:?}");
        }
    });
    Ok(())
}
