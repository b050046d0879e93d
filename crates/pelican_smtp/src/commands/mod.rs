// SPDX-FileCopyrightText: 2024 The pelican developers
//
// SPDX-License-Identifier: Apache-2.0

use crate::{
    commands::{
        auth::Auth, data::DataCommand, ehlo::Ehlo, mail::Mail, noop::Noop, quit::Quit, rcpt::Rcpt,
        rset::Rset,
    },
    servers::state::{AuthState, Connection, State},
};
use pelican_core::{accounts::Accounts, api::DirectoryClient, config::Config, events::EventChannel};
use pelican_deps::{
    color_eyre,
    futures::{Sink, SinkExt},
    nom::{
        branch::alt,
        bytes::complete::tag_no_case,
        combinator::value,
        error::{context, convert_error, VerboseError},
        Finish, IResult,
    },
    simdutf8::compat::from_utf8,
    tokio::sync::RwLock,
    tracing::{self, debug, error, instrument},
};
use std::sync::Arc;

mod auth;
mod data;
mod ehlo;
mod mail;
mod noop;
pub(crate) mod parsers;
mod quit;
mod rcpt;
mod rset;

/// State shared between the connection loop and the command handlers.
#[derive(Debug, Clone)]
pub struct Data {
    /// The per-connection state.
    pub con_state: Arc<RwLock<Connection>>,
}

/// One parsed command line.
#[derive(Debug)]
pub struct CommandData<'a> {
    command: Commands,
    arguments: &'a [&'a str],
}

/// The ESMTP subset the gateway accepts.
#[allow(clippy::upper_case_acronyms)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commands {
    /// `AUTH PLAIN`/`AUTH LOGIN`
    AUTH,
    /// `DATA`
    DATA,
    /// `EHLO`/`HELO`
    EHLO,
    /// `MAIL FROM`
    MAILFROM,
    /// `NOOP`
    NOOP,
    /// `QUIT`
    QUIT,
    /// `RCPT TO`
    RCPTTO,
    /// `RSET`
    RSET,
}

// Every verb the gateway knows, matched case-insensitively. The two-word
// verbs swallow their colon here so that what remains is only arguments.
fn verb(input: &str) -> IResult<&str, Commands, VerboseError<&str>> {
    context(
        "verb",
        alt((
            value(Commands::MAILFROM, tag_no_case("MAIL FROM:")),
            value(Commands::RCPTTO, tag_no_case("RCPT TO:")),
            value(Commands::EHLO, tag_no_case("EHLO")),
            value(Commands::EHLO, tag_no_case("HELO")),
            value(Commands::AUTH, tag_no_case("AUTH")),
            value(Commands::DATA, tag_no_case("DATA")),
            value(Commands::NOOP, tag_no_case("NOOP")),
            value(Commands::QUIT, tag_no_case("QUIT")),
            value(Commands::RSET, tag_no_case("RSET")),
        )),
    )(input)
}

/// What the connection loop should do after a command.
pub enum Response {
    /// Close the connection.
    Exit,
    /// Keep reading commands.
    Continue,
}

impl Data {
    // Splits a line into its verb and whitespace-separated arguments.
    // A one-word verb must be followed by whitespace or the end of the
    // line; anything glued onto it is rejected rather than guessed at.
    fn parse_internal(line: &str) -> Result<(Commands, Vec<&str>), String> {
        let trimmed = line.trim_end();
        let (rest, command) = verb(trimmed)
            .finish()
            .map_err(|e| convert_error(trimmed, e))?;
        if !rest.is_empty()
            && !rest.starts_with(' ')
            && !matches!(command, Commands::MAILFROM | Commands::RCPTTO)
        {
            return Err(format!("trailing input after verb: {rest:?}"));
        }
        Ok((command, rest.split_ascii_whitespace().collect()))
    }

    /// Parses one raw line and runs the matching command.
    #[instrument(skip(self, lines, config, accounts, client, events, line))]
    #[allow(clippy::too_many_lines, clippy::too_many_arguments)]
    pub async fn parse<S, E>(
        &self,
        lines: &mut S,
        config: Arc<Config>,
        accounts: &Arc<Accounts>,
        client: &Arc<dyn DirectoryClient>,
        events: &EventChannel,
        line: Vec<u8>,
    ) -> color_eyre::eyre::Result<Response>
    where
        E: std::error::Error + std::marker::Sync + std::marker::Send + 'static,
        S: Sink<String, Error = E> + std::marker::Unpin + std::marker::Send,
    {
        let receiving = matches!(
            self.con_state.read().await.state,
            State::ReceivingData(_)
        );
        if receiving {
            DataCommand { data: self }
                .receive(&config, lines, &line)
                .await?;
            return Ok(Response::Continue);
        }

        let Ok(line) = from_utf8(&line).map(str::to_owned) else {
            lines
                .send(String::from("500 5.5.2 Unrecognized command"))
                .await?;
            return Ok(Response::Continue);
        };
        debug!("Current request: {}", line);

        let auth_state = {
            match &self.con_state.read().await.state {
                State::Authenticating(auth_state) => Some(auth_state.clone()),
                _ => None,
            }
        };
        if let Some(auth_state) = auth_state {
            match auth_state {
                AuthState::Username => {
                    Auth { data: self }.username(lines, &line).await?;
                }
                AuthState::Plain => {
                    Auth { data: self }
                        .plain(lines, accounts, client, events, &line)
                        .await?;
                }
                AuthState::Password(_) => {
                    Auth { data: self }
                        .password(lines, accounts, client, events, &line)
                        .await?;
                }
            }
            return Ok(Response::Continue);
        }

        match Data::parse_internal(&line) {
            Ok((command, arguments)) => {
                let command_data = CommandData {
                    command,
                    arguments: &arguments,
                };

                match command_data.command {
                    Commands::RSET => {
                        Rset { data: self }.exec(lines).await?;
                    }
                    Commands::EHLO => {
                        Ehlo { data: self }
                            .exec(
                                &config.mail.hostname,
                                config.mail.max_message_size,
                                lines,
                                &command_data,
                            )
                            .await?;
                    }
                    Commands::QUIT => {
                        Quit { data: self }.exec(lines).await?;
                        return Ok(Response::Exit);
                    }
                    Commands::MAILFROM => {
                        Mail { data: self }.exec(lines, &command_data).await?;
                    }
                    Commands::RCPTTO => {
                        Rcpt { data: self }.exec(lines, &command_data).await?;
                    }
                    Commands::DATA => {
                        DataCommand { data: self }.exec(lines).await?;
                    }
                    Commands::AUTH => {
                        Auth { data: self }
                            .exec(lines, accounts, client, events, &command_data)
                            .await?;
                    }
                    Commands::NOOP => {
                        Noop.exec(lines).await?;
                    }
                }
            }
            Err(e) => {
                error!("[SMTP] Unparseable command: {}", e);
                lines
                    .send(String::from("500 5.5.2 Unrecognized command"))
                    .await?;
                return Ok(Response::Continue);
            }
        }
        Ok(Response::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_verbs() {
        for (input, expected) in [
            ("EHLO", Commands::EHLO),
            ("ehlo", Commands::EHLO),
            ("HELO", Commands::EHLO),
            ("QUIT", Commands::QUIT),
            ("DATA", Commands::DATA),
            ("noop", Commands::NOOP),
            ("RSET", Commands::RSET),
        ] {
            let (command, arguments) = Data::parse_internal(input).expect("parse");
            assert_eq!(command, expected);
            assert!(arguments.is_empty());
        }
    }

    #[test]
    fn two_word_verbs_keep_their_arguments() {
        let (command, arguments) =
            Data::parse_internal("MAIL FROM:<alice@svc.test> SIZE=100 REQUIRETLS")
                .expect("parse");
        assert_eq!(command, Commands::MAILFROM);
        assert_eq!(arguments, vec!["<alice@svc.test>", "SIZE=100", "REQUIRETLS"]);

        // Clients that put a space after the colon still parse.
        let (command, arguments) =
            Data::parse_internal("rcpt to: <bob@svc.test>").expect("parse");
        assert_eq!(command, Commands::RCPTTO);
        assert_eq!(arguments, vec!["<bob@svc.test>"]);
    }

    #[test]
    fn ehlo_carries_the_client_name() {
        let (command, arguments) =
            Data::parse_internal("EHLO client.example\r").expect("parse");
        assert_eq!(command, Commands::EHLO);
        assert_eq!(arguments, vec!["client.example"]);
    }

    #[test]
    fn junk_is_rejected() {
        assert!(Data::parse_internal("beeeeep").is_err());
        // A verb with trailing garbage glued on is not a verb.
        assert!(Data::parse_internal("DATAX").is_err());
        assert!(Data::parse_internal("MAIL TO:<x@y>").is_err());
    }
}
