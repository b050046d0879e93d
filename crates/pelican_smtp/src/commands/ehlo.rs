// SPDX-FileCopyrightText: 2024 The pelican developers
//
// SPDX-License-Identifier: Apache-2.0

use crate::commands::{CommandData, Data};
use pelican_deps::{
    color_eyre,
    futures::{Sink, SinkExt},
    tracing::{self, instrument},
};

pub struct Ehlo<'a> {
    pub data: &'a Data,
}

impl Ehlo<'_> {
    /// Greets the client and advertises the supported extensions.
    /// `SMTPUTF8` and `REQUIRETLS` are recognized but refused later, so
    /// they are deliberately not advertised.
    #[instrument(skip(self, hostname, lines, command_data))]
    pub async fn exec<S, E>(
        &self,
        hostname: &str,
        max_message_size: u64,
        lines: &mut S,
        command_data: &CommandData<'_>,
    ) -> color_eyre::eyre::Result<()>
    where
        E: std::error::Error + std::marker::Sync + std::marker::Send + 'static,
        S: Sink<String, Error = E> + std::marker::Unpin + std::marker::Send,
    {
        {
            self.data.con_state.write().await.ehlo = command_data
                .arguments
                .first()
                .map(std::string::ToString::to_string);
        }

        lines.feed(format!("250-{hostname}")).await?;
        lines.feed(format!("250-SIZE {max_message_size}")).await?;
        lines.feed(String::from("250-8BITMIME")).await?;
        lines.feed(String::from("250 AUTH PLAIN LOGIN")).await?;
        lines.flush().await?;
        Ok(())
    }
}
