// SPDX-FileCopyrightText: 2024 The pelican developers
//
// SPDX-License-Identifier: Apache-2.0

use crate::{commands::Data, servers::state::State};
use pelican_deps::{
    color_eyre,
    futures::{Sink, SinkExt},
    tracing::{self, instrument},
};

pub struct Rset<'a> {
    pub data: &'a Data,
}

impl Rset<'_> {
    /// Returns the session to idle from any state and clears the envelope.
    #[instrument(skip(self, lines))]
    pub async fn exec<S, E>(&self, lines: &mut S) -> color_eyre::eyre::Result<()>
    where
        E: std::error::Error + std::marker::Sync + std::marker::Send + 'static,
        S: Sink<String, Error = E> + std::marker::Unpin + std::marker::Send,
    {
        {
            let mut lock = self.data.con_state.write().await;
            if let Some(session) = lock.session.as_mut() {
                session.reset();
                lock.state = State::Authenticated;
            } else {
                lock.state = State::NotAuthenticated;
            }
        }
        lines.feed(String::from("250 OK")).await?;
        lines.flush().await?;
        Ok(())
    }
}
