// SPDX-FileCopyrightText: 2024 The pelican developers
//
// SPDX-License-Identifier: Apache-2.0

//! Per-connection SMTP session state: `RSET → MAIL → RCPT* → DATA`.
//!
//! A session is an immutable snapshot of the authenticated user (addresses,
//! settings, keyrings) plus the mutable envelope of the message currently
//! being submitted. `RSET` and logout clear the envelope.

use std::{collections::HashMap, sync::Arc};

use pelican_deps::{
    tokio_util::sync::CancellationToken,
    tracing::{self, info, instrument},
};

use pelican_core::{
    accounts::{AddressMode, GatewayUser},
    api::{DirectoryClient, MailSettings},
    crypto::KeyRing,
    events::{Event, EventChannel},
    message::Message,
    safe::SafeMap,
};

use crate::{error::SendError, send};

/// ESMTP parameters of a `MAIL FROM` command.
#[derive(Debug, Default, Clone)]
pub struct MailOptions {
    /// `SIZE=` declaration.
    pub size: Option<u64>,
    /// `SMTPUTF8` was requested.
    pub utf8: bool,
    /// `REQUIRETLS` was requested.
    pub require_tls: bool,
    /// `AUTH=<addr>` identity, without angle brackets.
    pub auth: Option<String>,
    /// `BODY=` declaration.
    pub body: Option<String>,
}

/// One authenticated SMTP session.
#[derive(Clone)]
pub struct Session {
    client: Arc<dyn DirectoryClient>,
    events: EventChannel,
    user_id: String,
    addr_id: String,
    addr_mode: AddressMode,
    emails: Arc<HashMap<String, String>>,
    settings: MailSettings,
    user_kr: Arc<KeyRing>,
    addr_krs: Arc<SafeMap<Arc<KeyRing>>>,
    from_addr_id: Option<String>,
    to: Vec<String>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("user_id", &self.user_id)
            .field("addr_id", &self.addr_id)
            .field("from_addr_id", &self.from_addr_id)
            .field("to", &self.to)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Builds a session snapshot for an authenticated user. `addr_id` is
    /// the address whose surface the client logged into.
    #[must_use]
    pub fn new(
        user: &Arc<GatewayUser>,
        addr_id: String,
        client: Arc<dyn DirectoryClient>,
        events: EventChannel,
    ) -> Self {
        Self {
            client,
            events,
            user_id: user.user_id.clone(),
            addr_id,
            addr_mode: user.address_mode,
            emails: Arc::new(user.emails()),
            settings: user.settings,
            user_kr: Arc::clone(&user.user_kr),
            addr_krs: Arc::clone(&user.addr_krs),
            from_addr_id: None,
            to: Vec::new(),
        }
    }

    /// Discard the currently processed envelope.
    #[instrument(skip(self))]
    pub fn reset(&mut self) {
        info!("SMTP session reset");
        self.from_addr_id = None;
        self.to.clear();
        self.events.publish(Event::Reset {
            user_id: self.user_id.clone(),
        });
    }

    /// Free all resources associated with the session.
    #[instrument(skip(self))]
    pub fn logout(&mut self) {
        info!("SMTP session logout");
        self.events.publish(Event::Logout {
            user_id: self.user_id.clone(),
        });
        self.from_addr_id = None;
        self.to.clear();
    }

    /// Set the return path for the currently processed message.
    #[instrument(skip(self, opts))]
    pub fn mail(&mut self, from: &str, opts: &MailOptions) -> Result<(), SendError> {
        info!("SMTP session mail");

        if opts.require_tls || opts.utf8 {
            return Err(SendError::NotImplemented);
        }
        if let Some(auth) = &opts.auth {
            if !auth.is_empty()
                && self.emails.get(&self.addr_id).map(String::as_str) != Some(auth.as_str())
            {
                return Err(SendError::NotImplemented);
            }
        }

        let matched = self
            .emails
            .iter()
            .find(|(_, email)| from.eq_ignore_ascii_case(email))
            .map(|(addr_id, _)| addr_id.clone());
        match matched {
            Some(addr_id) => {
                self.from_addr_id = Some(addr_id);
                Ok(())
            }
            None => Err(SendError::InvalidReturnPath),
        }
    }

    /// Add a recipient for the currently processed message. The raw
    /// argument is deduplicated case-sensitively.
    #[instrument(skip(self))]
    pub fn rcpt(&mut self, to: &str) -> Result<(), SendError> {
        info!("SMTP session rcpt");

        if to.is_empty() {
            return Err(SendError::InvalidRecipient);
        }
        if !self.to.iter().any(|existing| existing == to) {
            self.to.push(to.to_owned());
        }
        Ok(())
    }

    /// Whether `DATA` may start. Checked before the stream is consumed.
    pub fn check_data(&self) -> Result<(), SendError> {
        if self.from_addr_id.is_none() {
            return Err(SendError::InvalidReturnPath);
        }
        if self.to.is_empty() {
            return Err(SendError::InvalidRecipient);
        }
        Ok(())
    }

    /// Parse, sanitize and send the submitted message, returning the
    /// server-assigned message id. The whole pipeline shares the given
    /// cancellation scope.
    #[instrument(skip(self, raw, cancel))]
    pub async fn data(&self, raw: &[u8], cancel: CancellationToken) -> Result<String, SendError> {
        info!("SMTP session data");
        self.check_data()?;

        match cancel.run_until_cancelled(self.send(raw)).await {
            Some(result) => result,
            None => Err(SendError::Canceled),
        }
    }

    async fn send(&self, raw: &[u8]) -> Result<String, SendError> {
        let mut message = Message::parse(raw)?;

        // If the message names a sender, it wins over the return path.
        let mut from_addr_id = self
            .from_addr_id
            .clone()
            .ok_or(SendError::InvalidReturnPath)?;
        if let Some(sender) = &message.sender {
            let sanitized = send::sanitize_email(&sender.address);
            for (addr_id, email) in self.emails.iter() {
                if email.eq_ignore_ascii_case(&sanitized) {
                    from_addr_id = addr_id.clone();
                }
            }
        }

        let Some(addr_kr) = self.addr_krs.get(&from_addr_id, Arc::clone) else {
            return Err(SendError::MissingAddrKey);
        };
        let from_email = self
            .emails
            .get(&from_addr_id)
            .cloned()
            .unwrap_or_default();
        if addr_kr.first_key().is_err() {
            // Persistent key corruption; let upper layers re-prompt.
            self.events.publish(Event::KeyUnusable {
                user_id: self.user_id.clone(),
                address_id: from_addr_id.clone(),
            });
            return Err(SendError::KeyUnusable(from_email));
        }

        let emails: Vec<String> = self.emails.values().cloned().collect();
        let sent = send::send_with_key(
            self.client.as_ref(),
            &self.addr_id,
            self.addr_mode,
            &self.user_kr,
            &addr_kr,
            self.settings,
            &send::sanitize_email(&from_email),
            &self.to,
            &emails,
            &mut message,
        )
        .await?;

        self.events.publish(Event::MessageSent {
            user_id: self.user_id.clone(),
            address_id: self.addr_id.clone(),
            message_id: sent.id.clone(),
        });
        info!(message_id = %sent.id, "Message sent");

        Ok(sent.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{fake_client, internal_keys, test_user};
    use pelican_core::api::RecipientType;
    use pelican_deps::tokio;

    fn session() -> (Session, pelican_deps::tokio::sync::mpsc::UnboundedReceiver<Event>) {
        let user = test_user();
        let (events, rx) = EventChannel::new();
        let client = fake_client();
        let addr_id = user.primary_address().expect("primary").id.clone();
        (Session::new(&user, addr_id, client, events), rx)
    }

    #[test]
    fn unsupported_options_are_refused_before_any_transition() {
        let (mut session, _rx) = session();

        let err = session
            .mail(
                "alice@svc.test",
                &MailOptions {
                    require_tls: true,
                    ..MailOptions::default()
                },
            )
            .expect_err("refused");
        assert_eq!(err.reply(), "502 5.5.1 Command parameter not implemented");
        assert!(session.from_addr_id.is_none());

        let err = session
            .mail(
                "alice@svc.test",
                &MailOptions {
                    utf8: true,
                    ..MailOptions::default()
                },
            )
            .expect_err("refused");
        assert!(matches!(err, SendError::NotImplemented));

        // An AUTH parameter disagreeing with the authenticated address.
        let err = session
            .mail(
                "alice@svc.test",
                &MailOptions {
                    auth: Some(String::from("mallory@evil.test")),
                    ..MailOptions::default()
                },
            )
            .expect_err("refused");
        assert!(matches!(err, SendError::NotImplemented));
    }

    #[test]
    fn mail_resolves_return_path_case_insensitively() {
        let (mut session, _rx) = session();

        session
            .mail("ALICE@SVC.TEST", &MailOptions::default())
            .expect("owned address");
        assert_eq!(session.from_addr_id.as_deref(), Some("a1"));

        let err = session
            .mail("stranger@example.com", &MailOptions::default())
            .expect_err("not owned");
        assert!(matches!(err, SendError::InvalidReturnPath));
    }

    #[test]
    fn rcpt_deduplicates_case_sensitively() {
        let (mut session, _rx) = session();

        session.rcpt("bob@svc.test").expect("rcpt");
        session.rcpt("bob@svc.test").expect("rcpt duplicate");
        session.rcpt("Bob@svc.test").expect("rcpt distinct casing");
        assert_eq!(session.to, vec!["bob@svc.test", "Bob@svc.test"]);

        let err = session.rcpt("").expect_err("empty recipient");
        assert!(matches!(err, SendError::InvalidRecipient));
    }

    #[test]
    fn data_preconditions() {
        let (mut session, _rx) = session();

        assert!(matches!(
            session.check_data(),
            Err(SendError::InvalidReturnPath)
        ));

        session
            .mail("alice@svc.test", &MailOptions::default())
            .expect("mail");
        assert!(matches!(
            session.check_data(),
            Err(SendError::InvalidRecipient)
        ));

        session.rcpt("bob@svc.test").expect("rcpt");
        session.check_data().expect("ready");
    }

    #[test]
    fn reset_clears_the_envelope() {
        let (mut session, mut rx) = session();

        session
            .mail("alice@svc.test", &MailOptions::default())
            .expect("mail");
        session.rcpt("bob@svc.test").expect("rcpt");
        session.reset();

        assert!(session.from_addr_id.is_none());
        assert!(session.to.is_empty());
        assert!(matches!(
            rx.try_recv().expect("reset event"),
            Event::Reset { .. }
        ));
    }

    #[tokio::test]
    async fn data_sends_and_emits_message_sent() {
        let user = test_user();
        let (events, mut rx) = EventChannel::new();
        let client = fake_client();
        client.set_keys("bob@svc.test", internal_keys(), RecipientType::Internal);

        let addr_id = user.primary_address().expect("primary").id.clone();
        let mut session = Session::new(&user, addr_id, Arc::clone(&client), events);

        session
            .mail("alice@svc.test", &MailOptions::default())
            .expect("mail");
        session.rcpt("bob@svc.test").expect("rcpt");

        let message_id = session
            .data(b"Subject: hi\r\n\r\nhello", CancellationToken::new())
            .await
            .expect("send");
        assert_eq!(message_id, "msg-1");

        assert_eq!(
            rx.try_recv().expect("event"),
            Event::MessageSent {
                user_id: String::from("u1"),
                address_id: String::from("a1"),
                message_id: String::from("msg-1"),
            }
        );
    }
}
