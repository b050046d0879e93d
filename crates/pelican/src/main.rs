// SPDX-FileCopyrightText: 2024 The pelican developers
//
// SPDX-License-Identifier: Apache-2.0

//! Pelican Mail Gateway
//!
//! Pelican is a local gateway exposing a standard SMTP submission surface
//! to mail clients while speaking an end-to-end-encrypted REST protocol to
//! the remote mail service.
//!
#![deny(unsafe_code, clippy::unwrap_used)]
#![warn(
    clippy::cognitive_complexity,
    clippy::branches_sharing_code,
    clippy::imprecise_flops,
    clippy::missing_const_for_fn,
    clippy::mutex_integer,
    clippy::path_buf_push_overwrite,
    clippy::redundant_pub_crate,
    clippy::pedantic,
    clippy::dbg_macro,
    clippy::todo,
    clippy::fallible_impl_from,
    clippy::filetype_is_file,
    clippy::suboptimal_flops,
    clippy::fn_to_numeric_cast_any,
    clippy::if_then_some_else_none,
    clippy::lossy_float_literal,
    clippy::clone_on_ref_ptr
)]
#![allow(clippy::missing_panics_doc)]

use std::sync::Arc;

use pelican_core::{accounts::Accounts, api::http::HttpDirectory, events::EventChannel, panic_handler::PelicanPanicMessage};
use pelican_deps::{
    clap::{self, Parser},
    color_eyre::{self, eyre::Result},
    tokio::{
        self,
        signal::unix::{signal, SignalKind},
    },
    tokio_util::sync::CancellationToken,
    tracing::{info, warn},
    tracing_error, tracing_subscriber,
};

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    #[clap(short, long, default_value = "./config.yml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Setup panic and error reports
    let builder = color_eyre::config::HookBuilder::default().panic_message(PelicanPanicMessage);
    let (panic_hook, eyre_hook) = builder.into_hooks();
    eyre_hook.install()?;
    std::panic::set_hook(Box::new(move |panic_info| {
        eprintln!("{}", panic_hook.panic_report(panic_info));
    }));

    // Get args and config
    let args = Args::parse();
    info!("Starting Pelican Mail Gateway");
    let config = pelican_core::get_config(args.config).await?;

    // Setup the rest of our logging
    {
        use tracing_error::ErrorLayer;
        use tracing_subscriber::layer::SubscriberExt;
        use tracing_subscriber::util::SubscriberInitExt;
        use tracing_subscriber::EnvFilter;
        tracing_subscriber::Registry::default()
            .with(ErrorLayer::default())
            .with(tracing_subscriber::fmt::Layer::default())
            .with(EnvFilter::from_default_env())
            .init();
    }

    // Account bootstrap generates the keyrings, which blocks on the OS RNG.
    let config_clone = Arc::clone(&config);
    let accounts = tokio::task::spawn_blocking(move || Accounts::from_config(&config_clone)).await?;
    if accounts.is_empty() {
        warn!("No users configured; every AUTH will fail");
    }
    let accounts = Arc::new(accounts);

    let client = Arc::new(HttpDirectory::new(&config.api)?);

    // Sessions publish onto one channel; the consumer is single-threaded.
    let (events, mut event_rx) = EventChannel::new();
    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            info!("Event: {:?}", event);
        }
    });

    // Get SIGTERMs
    let mut sigterms = signal(SignalKind::terminate())?;
    let shutdown_flag = CancellationToken::new();

    pelican_smtp::servers::start(
        Arc::clone(&config),
        Arc::clone(&accounts),
        client,
        events,
        shutdown_flag.clone(),
    )
    .await?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            cleanup(&shutdown_flag);
        }
        _ = sigterms.recv() => {
            cleanup(&shutdown_flag);
        }
    }
    Ok(())
}

fn cleanup(shutdown_flag: &CancellationToken) {
    info!("Received shutdown signal. Cleaning up");
    shutdown_flag.cancel();
}
