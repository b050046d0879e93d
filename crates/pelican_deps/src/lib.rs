// SPDX-FileCopyrightText: 2024 The pelican developers
//
// SPDX-License-Identifier: Apache-2.0

pub use futures;
pub use tokio;
pub use tokio_stream;
pub use tokio_util;

pub use clap;

pub use color_eyre;

pub use tracing;
pub use tracing_error;
pub use tracing_subscriber;

pub use base64;

pub use serde;
pub use serde_json;
pub use serde_yaml;

pub use bytes;

pub use simdutf8;

pub use mailparse;
pub use quoted_printable;

pub use encoding_rs;

pub use chardetng;

pub use async_trait;

pub use secrecy;

pub use argon2;

pub use rand;

pub use uuid;

pub use nom;

pub use reqwest;

pub use thiserror;

pub use aes_gcm;
pub use ed25519_dalek;
pub use hkdf;
pub use k256;
pub use sha2;
