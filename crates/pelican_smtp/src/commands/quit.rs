// SPDX-FileCopyrightText: 2024 The pelican developers
//
// SPDX-License-Identifier: Apache-2.0

use crate::commands::Data;
use pelican_deps::{
    color_eyre,
    futures::{Sink, SinkExt},
    tracing::{self, instrument},
};

pub struct Quit<'a> {
    pub data: &'a Data,
}

impl Quit<'_> {
    #[instrument(skip(self, lines))]
    pub async fn exec<S, E>(&self, lines: &mut S) -> color_eyre::eyre::Result<()>
    where
        E: std::error::Error + std::marker::Sync + std::marker::Send + 'static,
        S: Sink<String, Error = E> + std::marker::Unpin + std::marker::Send,
    {
        {
            let mut lock = self.data.con_state.write().await;
            if let Some(session) = lock.session.as_mut() {
                session.logout();
            }
            lock.session = None;
        }
        lines.send(String::from("221 2.0.0 Bye")).await?;
        Ok(())
    }
}
