// SPDX-FileCopyrightText: 2024 The pelican developers
//
// SPDX-License-Identifier: Apache-2.0

//! The outbound send pipeline, run once per accepted `DATA`.
//!
//! Sequence: sanitize the parsed message against the envelope, resolve the
//! conversation parent while the draft body is being encrypted, create the
//! draft with its attachments, resolve per-recipient send preferences,
//! assemble the multi-scheme packages and submit.

use pelican_deps::{
    tokio,
    tracing::{self, debug, instrument},
};

use pelican_core::{
    accounts::AddressMode,
    api::{DirectoryClient, EmailAddress, MailSettings, SentMessage},
    crypto::KeyRing,
    message::Message,
};

use crate::error::SendError;

pub(crate) mod draft;
pub(crate) mod package;
pub(crate) mod prefs;
pub(crate) mod refs;

/// Sends a parsed message with the given address key.
#[allow(clippy::too_many_arguments)]
#[instrument(skip_all)]
pub(crate) async fn send_with_key(
    client: &dyn DirectoryClient,
    addr_id: &str,
    addr_mode: AddressMode,
    user_kr: &KeyRing,
    addr_kr: &KeyRing,
    settings: MailSettings,
    from: &str,
    to: &[String],
    emails: &[String],
    message: &mut Message,
) -> Result<SentMessage, SendError> {
    if settings.attach_public_key {
        let key = addr_kr.primary_key()?;
        let armored = addr_kr.armored_public_key()?;
        let name = format!(
            "publickey - {} - {}",
            addr_kr.identity(),
            &key.fingerprint()[..8]
        );
        message.attach_public_key(&armored, &name);
    }

    sanitize(message, from, to, emails)?;

    // The draft names its parent, so reference resolution must finish
    // before the draft is created; the body encryption half of the draft
    // work overlaps it.
    let (parent_id, armored_body) = tokio::try_join!(
        refs::get_parent_id(client, addr_id, addr_mode, &message.references),
        async {
            addr_kr
                .encrypt_armored_signed(message.rich_body.as_bytes())
                .map_err(SendError::from)
        }
    )?;
    debug!(parent = parent_id.as_deref().unwrap_or(""), "Parent resolved");

    let (draft, attachment_keys) =
        draft::create_draft_with_attachments(client, addr_kr, message, parent_id, armored_body)
            .await?;

    let recipients = prefs::get_recipients(
        client,
        user_kr,
        settings,
        &message.recipients(),
        message.mime_type,
        message.is_html(),
    )
    .await?;

    let req = package::create_send_req(
        addr_kr,
        &message.mime_body,
        &message.rich_body,
        &message.plain_body,
        &recipients,
        &attachment_keys,
    )?;

    Ok(client.send_draft(&draft.id, req).await?)
}

/// Reconciles the parsed message with the SMTP envelope.
pub(crate) fn sanitize(
    message: &mut Message,
    from: &str,
    to: &[String],
    emails: &[String],
) -> Result<(), SendError> {
    // The envelope return path substitutes for a missing sender.
    match &mut message.sender {
        None => {
            message.sender = Some(EmailAddress {
                name: String::new(),
                address: from.to_owned(),
            });
        }
        Some(sender) if sender.address.is_empty() => sender.address = from.to_owned(),
        _ => {}
    }

    // The sending address must be owned; rewrite it to the canonical
    // casing, keeping any user-supplied plus tag.
    let sender_addr = message
        .sender
        .as_ref()
        .map(|sender| sender.address.clone())
        .unwrap_or_default();
    let Some(idx) = emails
        .iter()
        .position(|email| email.eq_ignore_ascii_case(&sanitize_email(&sender_addr)))
    else {
        return Err(SendError::AddressNotOwned(sender_addr));
    };
    if let Some(sender) = &mut message.sender {
        sender.address = construct_email(&sender_addr, &emails[idx]);
    }

    // The To list only keeps addresses we actually plan to send to.
    message.to_list.retain(|addr| to.contains(&addr.address));

    // Envelope recipients absent from To and Cc are BCC recipients.
    for recipient in to {
        if !message.recipients().contains(recipient) {
            message.bcc_list.push(EmailAddress {
                name: String::new(),
                address: recipient.clone(),
            });
        }
    }

    Ok(())
}

/// Strips any `+tag` from the local part.
pub(crate) fn sanitize_email(email: &str) -> String {
    let Some((local, domain)) = email.split_once('@') else {
        return email.to_owned();
    };
    let local = local.split('+').next().unwrap_or(local);
    format!("{local}@{domain}")
}

/// Rewrites a header address to the owned address's canonical casing,
/// carrying over the header's plus tag if it has one.
pub(crate) fn construct_email(header_email: &str, address_email: &str) -> String {
    let Some((header_local, _)) = header_email.split_once('@') else {
        return address_email.to_owned();
    };
    let mut parts = header_local.splitn(2, '+');
    let (Some(_), Some(tag)) = (parts.next(), parts.next()) else {
        return address_email.to_owned();
    };
    let Some((local, domain)) = address_email.split_once('@') else {
        return address_email.to_owned();
    };
    format!("{local}+{tag}@{domain}")
}
