// SPDX-FileCopyrightText: 2024 The pelican developers
//
// SPDX-License-Identifier: Apache-2.0

use crate::commands::{parsers::address_argument, CommandData, Data};
use pelican_deps::{
    color_eyre,
    futures::{Sink, SinkExt},
    tracing::{self, error, instrument},
};

pub struct Rcpt<'a> {
    pub data: &'a Data,
}

impl Rcpt<'_> {
    #[instrument(skip(self, lines, command_data))]
    pub async fn exec<S, E>(
        &self,
        lines: &mut S,
        command_data: &CommandData<'_>,
    ) -> color_eyre::eyre::Result<()>
    where
        E: std::error::Error + std::marker::Sync + std::marker::Send + 'static,
        S: Sink<String, Error = E> + std::marker::Unpin + std::marker::Send,
    {
        let mut lock = self.data.con_state.write().await;
        let Some(session) = lock.session.as_mut() else {
            lines
                .send(String::from("503 Bad sequence of commands"))
                .await?;
            return Ok(());
        };

        let Some(argument) = command_data.arguments.first() else {
            lines
                .send(String::from("501 5.1.3 Missing recipient argument"))
                .await?;
            return Ok(());
        };

        match address_argument(argument) {
            Ok((_, to)) => match session.rcpt(to) {
                Ok(()) => {
                    lines
                        .send(format!("250 2.1.5 Recipient {to} OK"))
                        .await?;
                }
                Err(e) => lines.send(e.reply()).await?,
            },
            Err(e) => {
                error!("Failed to parse recipient: {:?}", e);
                lines
                    .send(String::from("501 5.1.3 Unable to parse recipient"))
                    .await?;
            }
        }
        Ok(())
    }
}
