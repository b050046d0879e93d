// SPDX-FileCopyrightText: 2024 The pelican developers
//
// SPDX-License-Identifier: Apache-2.0

use crate::{commands::Data, servers::state::State};
use pelican_core::config::Config;
use pelican_deps::{
    color_eyre,
    futures::{Sink, SinkExt},
    tracing::{self, debug, instrument},
};

pub struct DataCommand<'a> {
    pub data: &'a Data,
}

impl DataCommand<'_> {
    /// Starts the DATA phase. The envelope preconditions are checked
    /// before a single byte of the stream is accepted.
    #[instrument(skip(self, lines))]
    pub async fn exec<S, E>(&self, lines: &mut S) -> color_eyre::eyre::Result<()>
    where
        E: std::error::Error + std::marker::Sync + std::marker::Send + 'static,
        S: Sink<String, Error = E> + std::marker::Unpin + std::marker::Send,
    {
        debug!("Waiting for incoming data");
        {
            let mut lock = self.data.con_state.write().await;
            let Some(session) = lock.session.as_ref() else {
                lines
                    .send(String::from("503 Bad sequence of commands"))
                    .await?;
                return Ok(());
            };
            if let Err(e) = session.check_data() {
                lines.send(e.reply()).await?;
                return Ok(());
            }
            lock.state = State::ReceivingData(Vec::new());
        }
        lines
            .send(String::from("354 Start mail input; end with <CRLF>.<CRLF>"))
            .await?;
        Ok(())
    }

    /// Consumes one line of the DATA stream. The terminating dot runs the
    /// send pipeline and replies with its outcome.
    #[instrument(skip(self, config, lines, line))]
    pub async fn receive<S, E>(
        &self,
        config: &Config,
        lines: &mut S,
        line: &[u8],
    ) -> color_eyre::eyre::Result<()>
    where
        E: std::error::Error + std::marker::Sync + std::marker::Send + 'static,
        S: Sink<String, Error = E> + std::marker::Unpin + std::marker::Send,
    {
        if line != b"." {
            let mut lock = self.data.con_state.write().await;
            if let State::ReceivingData(buffer) = &mut lock.state {
                // RFC 5321 dot transparency.
                let line = line.strip_prefix(b".").unwrap_or(line);
                buffer.extend_from_slice(line);
                buffer.extend_from_slice(b"\r\n");
            }
            return Ok(());
        }
        debug!("Got end of data");

        let (buffer, session, cancel) = {
            let mut lock = self.data.con_state.write().await;
            let State::ReceivingData(buffer) =
                std::mem::replace(&mut lock.state, State::Authenticated)
            else {
                color_eyre::eyre::bail!("Invalid state");
            };
            (buffer, lock.session.clone(), lock.cancel.child_token())
        };
        let Some(session) = session else {
            lines
                .send(String::from("503 Bad sequence of commands"))
                .await?;
            return Ok(());
        };

        if buffer.len() as u64 > config.mail.max_message_size {
            lines
                .send(String::from("552 5.3.4 Message too big for system"))
                .await?;
            return Ok(());
        }

        let result = session.data(&buffer, cancel).await;

        // The transaction is over either way; the next message starts
        // with a fresh envelope.
        {
            let mut lock = self.data.con_state.write().await;
            if let Some(session) = lock.session.as_mut() {
                session.reset();
            }
        }

        match result {
            Ok(message_id) => {
                lines
                    .send(format!("250 2.0.0 OK: queued as {message_id}"))
                    .await?;
            }
            Err(e) => lines.send(e.reply()).await?,
        }
        Ok(())
    }
}
