// SPDX-FileCopyrightText: 2024 The pelican developers
//
// SPDX-License-Identifier: Apache-2.0

//! The accept loop and per-connection command loop of the submission
//! surface.
//!
//! Replies are written straight back through the framed transport; there
//! is no separate writer task, since SMTP is strictly request/response
//! within one connection.

use crate::{
    commands::{Data, Response},
    servers::state::Connection,
};
use pelican_core::{
    accounts::Accounts,
    api::DirectoryClient,
    config::Config,
    events::EventChannel,
    line_codec::{LinesCodec, LinesCodecError},
    safe::SafeMap,
    LINE_LIMIT,
};
use pelican_deps::{
    color_eyre::Result,
    futures::{Sink, SinkExt, StreamExt},
    tokio::{
        self,
        net::{TcpListener, TcpStream},
    },
    tokio_stream::wrappers::TcpListenerStream,
    tokio_util::{codec::Framed, sync::CancellationToken},
    tracing::{self, debug, error, info, instrument, warn},
    uuid,
};
use std::{net::SocketAddr, sync::Arc};

/// An unencrypted smtp server
pub struct Unencrypted;

impl Unencrypted {
    /// Binds the configured submission listeners and serves until the
    /// shutdown token fires.
    #[allow(clippy::missing_errors_doc)]
    #[instrument(skip_all)]
    pub async fn run(
        config: Arc<Config>,
        accounts: Arc<Accounts>,
        client: Arc<dyn DirectoryClient>,
        events: EventChannel,
        shutdown_flag: CancellationToken,
    ) -> Result<()> {
        let addrs: Vec<SocketAddr> = match &config.listen_ips {
            Some(listen_ips) => listen_ips
                .iter()
                .map(|ip| format!("{}:{}", ip, config.port).parse())
                .filter_map(Result::ok)
                .collect(),
            None => vec![format!("127.0.0.1:{}", config.port).parse()?],
        };
        for addr in addrs {
            let listener = TcpListener::bind(addr).await?;
            info!("[SMTP] Accepting submissions on {addr}");

            tokio::spawn(accept_loop(
                TcpListenerStream::new(listener),
                Arc::clone(&config),
                Arc::clone(&accounts),
                Arc::clone(&client),
                events.clone(),
                shutdown_flag.clone(),
            ));
        }

        Ok(())
    }
}

async fn accept_loop(
    mut incoming: TcpListenerStream,
    config: Arc<Config>,
    accounts: Arc<Accounts>,
    client: Arc<dyn DirectoryClient>,
    events: EventChannel,
    shutdown_flag: CancellationToken,
) {
    // Live connections by id; cross-connection state goes through the
    // safe map.
    let connections: Arc<SafeMap<String>> = Arc::new(SafeMap::new());

    loop {
        let accepted = tokio::select! {
            () = shutdown_flag.cancelled() => break,
            next = incoming.next() => match next {
                Some(accepted) => accepted,
                None => break,
            },
        };
        let tcp_stream = match accepted {
            Ok(tcp_stream) => tcp_stream,
            Err(e) => {
                warn!("[SMTP] Could not accept connection: {e}");
                continue;
            }
        };
        let peer = match tcp_stream.peer_addr() {
            Ok(peer) => peer,
            Err(e) => {
                warn!("[SMTP] Dropping connection without a peer address: {e}");
                continue;
            }
        };

        let connection_id = uuid::Uuid::new_v4().to_string();
        connections.set(&connection_id, peer.to_string());
        debug!(%peer, open = connections.len(), "[SMTP] Connection opened");

        let config = Arc::clone(&config);
        let accounts = Arc::clone(&accounts);
        let client = Arc::clone(&client);
        let events = events.clone();
        let cancel = shutdown_flag.child_token();
        let connections = Arc::clone(&connections);
        tokio::spawn(async move {
            if let Err(e) =
                handle_connection(tcp_stream, peer, config, accounts, client, events, cancel)
                    .await
            {
                warn!(%peer, "[SMTP] Connection ended abnormally: {e:#}");
            }
            connections.get_and_delete(&connection_id, |_| ());
            debug!(%peer, "[SMTP] Connection closed");
        });
    }
}

#[allow(clippy::too_many_arguments)]
async fn handle_connection(
    tcp_stream: TcpStream,
    peer: SocketAddr,
    config: Arc<Config>,
    accounts: Arc<Accounts>,
    client: Arc<dyn DirectoryClient>,
    events: EventChannel,
    cancel: CancellationToken,
) -> Result<()> {
    let mut framed = Framed::new(tcp_stream, LinesCodec::new_with_max_length(LINE_LIMIT));
    greet(&config.mail.hostname, &mut framed).await?;

    let state = Connection::new(false, peer.ip().to_string(), cancel);
    let data = Data {
        con_state: Arc::clone(&state),
    };

    loop {
        let line = match framed.next().await {
            Some(Ok(line)) => line,
            Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                framed.send(String::from("500 5.5.2 Line too long")).await?;
                continue;
            }
            Some(Err(LinesCodecError::Io(e))) => {
                debug!(%peer, "[SMTP] Read failed: {e}");
                break;
            }
            None => break,
        };

        let outcome = data
            .parse(
                &mut framed,
                Arc::clone(&config),
                &accounts,
                &client,
                &events,
                line,
            )
            .await;
        match outcome {
            Ok(Response::Continue) => {}
            Ok(Response::Exit) => break,
            Err(e) => {
                error!(%peer, "[SMTP] Command handling failed: {e:#}");
                let _ = framed
                    .send(String::from(
                        "421 4.3.0 Internal error, closing transmission channel",
                    ))
                    .await;
                break;
            }
        }
    }

    // Whatever the connection still had in flight dies with it.
    let mut lock = state.write().await;
    lock.cancel.cancel();
    if let Some(session) = lock.session.as_mut() {
        session.logout();
    }
    lock.session = None;
    Ok(())
}

async fn greet<S, E>(hostname: &str, lines: &mut S) -> Result<()>
where
    E: std::error::Error + std::marker::Sync + std::marker::Send + 'static,
    S: Sink<String, Error = E> + std::marker::Unpin + std::marker::Send,
{
    lines
        .send(format!("220 {hostname} pelican ESMTP service ready"))
        .await?;
    Ok(())
}
