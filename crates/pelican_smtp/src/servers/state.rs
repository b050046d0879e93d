// SPDX-FileCopyrightText: 2024 The pelican developers
//
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use pelican_deps::{tokio::sync::RwLock, tokio_util::sync::CancellationToken};

use crate::session::Session;

/// State of the connection between us and the client
#[derive(Debug)]
pub struct Connection {
    /// The protocol phase of the connection.
    pub state: State,
    /// Whether the transport is encrypted.
    pub secure: bool,
    /// The peer address.
    pub peer_addr: String,
    /// The name the client introduced itself with.
    pub ehlo: Option<String>,
    /// The authenticated session, if any.
    pub session: Option<Session>,
    /// The cancellation scope of the connection; each `DATA` derives a
    /// child from it.
    pub cancel: CancellationToken,
}

impl Connection {
    /// Creates the shared connection state.
    #[must_use]
    pub fn new(secure: bool, peer_addr: String, cancel: CancellationToken) -> Arc<RwLock<Self>> {
        Arc::new(RwLock::new(Connection {
            state: State::NotAuthenticated,
            secure,
            peer_addr,
            ehlo: None,
            session: None,
            cancel,
        }))
    }
}

/// The protocol phase.
#[derive(Debug)]
pub enum State {
    /// Initial state
    NotAuthenticated,
    /// Authentication in progress
    Authenticating(AuthState),
    /// Authentication done
    Authenticated,
    /// DATA command issued; the buffer accumulates the raw stream
    ReceivingData(Vec<u8>),
}

/// Which part of the AUTH exchange is pending.
#[allow(clippy::module_name_repetitions)]
#[derive(Debug, Clone)]
pub enum AuthState {
    /// Waiting for the PLAIN initial response.
    Plain,
    /// Waiting for the LOGIN username.
    Username,
    /// Waiting for the LOGIN password.
    Password(String),
}
