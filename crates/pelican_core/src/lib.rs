// SPDX-FileCopyrightText: 2024 The pelican developers
//
// SPDX-License-Identifier: Apache-2.0

//! Core logic for the pelican mail gateway
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
#![warn(missing_docs)]
#![allow(
    clippy::missing_panics_doc,
    clippy::missing_errors_doc,
    clippy::module_name_repetitions
)]

use std::{path::Path, sync::Arc};

use pelican_deps::{
    color_eyre::Result,
    tracing::{self, error, instrument},
};

/// Local user accounts and their keyrings
pub mod accounts;

/// The upstream directory API client
pub mod api;

/// The configuration file for the gateway
pub mod config;

/// Keyrings, session keys and packet encryption
pub mod crypto;

/// Events published by sessions
pub mod events;

/// Line-based codec for the SMTP transport
pub mod line_codec;

/// RFC 5322 message parsing and projections
pub mod message;

/// A custom panic handler for pelican
pub mod panic_handler;

/// Concurrency-safe ordered maps
pub mod safe;

/// Returns the config struct from the provided location or defaults
#[instrument(skip(config_path))]
pub async fn get_config(config_path: String) -> Result<Arc<config::Config>> {
    let config = if Path::new(&config_path).exists() {
        Arc::new(config::Config::load(config_path).await?)
    } else if Path::new("/etc/pelican/config.yml").exists() {
        Arc::new(config::Config::load("/etc/pelican/config.yml").await?)
    } else if Path::new("/etc/pelican/config.yaml").exists() {
        Arc::new(config::Config::load("/etc/pelican/config.yaml").await?)
    } else {
        error!("No config file found. Please follow the readme.");
        pelican_deps::color_eyre::eyre::bail!("No config file found");
    };
    Ok(config)
}

/// The maximum size of a line in bytes
pub const LINE_LIMIT: usize = 8192;
