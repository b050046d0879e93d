// SPDX-FileCopyrightText: 2024 The pelican developers
//
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use crate::{
    commands::{CommandData, Data},
    servers::state::{AuthState, State},
    session::Session,
};
use pelican_core::{accounts::Accounts, api::DirectoryClient, events::EventChannel};
use pelican_deps::{
    base64::{engine::general_purpose::STANDARD as BASE64, Engine as _},
    color_eyre,
    futures::{Sink, SinkExt},
    secrecy::SecretString,
    simdutf8::compat::from_utf8,
    tracing::{self, instrument},
};

pub struct Auth<'a> {
    pub data: &'a Data,
}

impl Auth<'_> {
    #[instrument(skip(self, lines, accounts, client, events, command_data))]
    pub async fn exec<S, E>(
        &self,
        lines: &mut S,
        accounts: &Arc<Accounts>,
        client: &Arc<dyn DirectoryClient>,
        events: &EventChannel,
        command_data: &CommandData<'_>,
    ) -> color_eyre::eyre::Result<()>
    where
        E: std::error::Error + std::marker::Sync + std::marker::Send + 'static,
        S: Sink<String, Error = E> + std::marker::Unpin + std::marker::Send,
    {
        {
            let lock = self.data.con_state.read().await;
            if lock.session.is_some() {
                lines
                    .send(String::from("503 Bad sequence of commands"))
                    .await?;
                return Ok(());
            }
        }
        let Some(mechanism) = command_data.arguments.first() else {
            lines
                .send(String::from("501 Syntax error in parameters or arguments"))
                .await?;
            return Ok(());
        };

        match mechanism.to_ascii_uppercase().as_str() {
            "PLAIN" => {
                if let Some(initial) = command_data.arguments.get(1) {
                    self.plain(lines, accounts, client, events, initial).await?;
                } else {
                    self.data.con_state.write().await.state =
                        State::Authenticating(AuthState::Plain);
                    lines.send(String::from("334 ")).await?;
                }
            }
            "LOGIN" => {
                self.data.con_state.write().await.state =
                    State::Authenticating(AuthState::Username);
                lines.send(String::from("334 VXNlcm5hbWU6")).await?;
            }
            _ => {
                lines
                    .send(String::from("504 Unrecognized authentication type."))
                    .await?;
            }
        }
        Ok(())
    }

    #[instrument(skip(self, lines, accounts, client, events, line))]
    pub async fn plain<S, E>(
        &self,
        lines: &mut S,
        accounts: &Arc<Accounts>,
        client: &Arc<dyn DirectoryClient>,
        events: &EventChannel,
        line: &str,
    ) -> color_eyre::eyre::Result<()>
    where
        E: std::error::Error + std::marker::Sync + std::marker::Send + 'static,
        S: Sink<String, Error = E> + std::marker::Unpin + std::marker::Send,
    {
        let Ok(bytes) = BASE64.decode(line.as_bytes()) else {
            self.data.con_state.write().await.state = State::NotAuthenticated;
            lines
                .send(String::from("501 Syntax error in parameters or arguments"))
                .await?;
            return Ok(());
        };

        // RFC 4616: authzid NUL authcid NUL passwd
        let parts: Vec<&[u8]> = bytes.split(|b| *b == 0).collect();
        if parts.len() != 3 {
            self.data.con_state.write().await.state = State::NotAuthenticated;
            lines
                .send(String::from("501 Syntax error in parameters or arguments"))
                .await?;
            return Ok(());
        }
        let (Ok(username), Ok(password)) = (from_utf8(parts[1]), from_utf8(parts[2])) else {
            self.data.con_state.write().await.state = State::NotAuthenticated;
            lines
                .send(String::from("501 Syntax error in parameters or arguments"))
                .await?;
            return Ok(());
        };

        self.login(lines, accounts, client, events, username, password)
            .await
    }

    #[instrument(skip(self, lines, line))]
    pub async fn username<S, E>(&self, lines: &mut S, line: &str) -> color_eyre::eyre::Result<()>
    where
        E: std::error::Error + std::marker::Sync + std::marker::Send + 'static,
        S: Sink<String, Error = E> + std::marker::Unpin + std::marker::Send,
    {
        match BASE64.decode(line.as_bytes()) {
            Ok(bytes) => {
                let username = from_utf8(&bytes)?.to_owned();
                self.data.con_state.write().await.state =
                    State::Authenticating(AuthState::Password(username));
                lines.send(String::from("334 UGFzc3dvcmQ6")).await?;
            }
            Err(_) => {
                self.data.con_state.write().await.state = State::NotAuthenticated;
                lines
                    .send(String::from("501 Syntax error in parameters or arguments"))
                    .await?;
            }
        }
        Ok(())
    }

    #[instrument(skip(self, lines, accounts, client, events, line))]
    pub async fn password<S, E>(
        &self,
        lines: &mut S,
        accounts: &Arc<Accounts>,
        client: &Arc<dyn DirectoryClient>,
        events: &EventChannel,
        line: &str,
    ) -> color_eyre::eyre::Result<()>
    where
        E: std::error::Error + std::marker::Sync + std::marker::Send + 'static,
        S: Sink<String, Error = E> + std::marker::Unpin + std::marker::Send,
    {
        let username = {
            match &self.data.con_state.read().await.state {
                State::Authenticating(AuthState::Password(username)) => username.clone(),
                _ => {
                    lines
                        .send(String::from("503 Bad sequence of commands"))
                        .await?;
                    return Ok(());
                }
            }
        };

        match BASE64.decode(line.as_bytes()) {
            Ok(bytes) => {
                let password = from_utf8(&bytes)?.to_owned();
                self.login(lines, accounts, client, events, &username, &password)
                    .await?;
            }
            Err(_) => {
                self.data.con_state.write().await.state = State::NotAuthenticated;
                lines
                    .send(String::from("501 Syntax error in parameters or arguments"))
                    .await?;
            }
        }
        Ok(())
    }

    async fn login<S, E>(
        &self,
        lines: &mut S,
        accounts: &Arc<Accounts>,
        client: &Arc<dyn DirectoryClient>,
        events: &EventChannel,
        username: &str,
        password: &str,
    ) -> color_eyre::eyre::Result<()>
    where
        E: std::error::Error + std::marker::Sync + std::marker::Send + 'static,
        S: Sink<String, Error = E> + std::marker::Unpin + std::marker::Send,
    {
        let verified = accounts.verify(username, &SecretString::new(password.to_owned()));
        let Some(user) = verified else {
            self.data.con_state.write().await.state = State::NotAuthenticated;
            lines
                .send(String::from("535 5.7.8 Authentication credentials invalid"))
                .await?;
            return Ok(());
        };

        // In split mode clients log in with the address itself; otherwise
        // the primary address is the active one.
        let addr_id = user
            .address_by_email(username)
            .or_else(|| user.primary_address())
            .map(|addr| addr.id.clone());
        let Some(addr_id) = addr_id else {
            self.data.con_state.write().await.state = State::NotAuthenticated;
            lines
                .send(String::from("535 5.7.8 Authentication credentials invalid"))
                .await?;
            return Ok(());
        };

        {
            let mut lock = self.data.con_state.write().await;
            lock.session = Some(Session::new(
                &user,
                addr_id,
                Arc::clone(client),
                events.clone(),
            ));
            lock.state = State::Authenticated;
        }
        lines
            .send(String::from("235 2.7.0 Authentication succeeded"))
            .await?;
        Ok(())
    }
}
