// SPDX-FileCopyrightText: 2024 The pelican developers
//
// SPDX-License-Identifier: Apache-2.0

use crate::commands::{
    parsers::{address_argument, mail_options},
    CommandData, Data,
};
use pelican_deps::{
    color_eyre,
    futures::{Sink, SinkExt},
    tracing::{self, error, instrument},
};

pub struct Mail<'a> {
    pub data: &'a Data,
}

impl Mail<'_> {
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
                .send(String::from("501 5.5.4 Missing return path argument"))
                .await?;
            return Ok(());
        };

        match address_argument(argument) {
            Ok((_, from)) => {
                let opts = mail_options(&command_data.arguments[1..]);
                match session.mail(from, &opts) {
                    Ok(()) => lines.send(String::from("250 OK")).await?,
                    Err(e) => lines.send(e.reply()).await?,
                }
            }
            Err(e) => {
                error!("Failed to parse return path: {:?}", e);
                lines
                    .send(String::from("501 5.1.7 Unable to parse return path"))
                    .await?;
            }
        }
        Ok(())
    }
}
