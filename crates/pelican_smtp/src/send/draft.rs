// SPDX-FileCopyrightText: 2024 The pelican developers
//
// SPDX-License-Identifier: Apache-2.0

//! Server-side draft creation and parallel attachment upload.

use std::{collections::HashMap, future::Future, num::NonZeroUsize, pin::Pin};

use pelican_deps::{
    base64::{engine::general_purpose::STANDARD as BASE64, Engine as _},
    futures::{stream, StreamExt, TryStreamExt},
    tracing::{self, debug, instrument},
};

use pelican_core::{
    api::{CreateAttachmentReq, CreateDraftReq, DirectoryClient, DraftMessage, DraftTemplate},
    crypto::{CryptoError, KeyRing, SessionKey},
    message::{Attachment, Message},
};

use crate::error::SendError;

/// Creates a draft with the sanitized headers and the armored body, then
/// uploads every attachment. Returns the draft and the per-attachment
/// session keys, keyed by server-assigned attachment id.
#[instrument(skip_all)]
pub(crate) async fn create_draft_with_attachments(
    client: &dyn DirectoryClient,
    addr_kr: &KeyRing,
    message: &Message,
    parent_id: Option<String>,
    armored_body: String,
) -> Result<(DraftMessage, HashMap<String, SessionKey>), SendError> {
    let sender = message
        .sender
        .clone()
        .ok_or(SendError::InvalidReturnPath)?;

    let draft = client
        .create_draft(CreateDraftReq {
            message: DraftTemplate {
                subject: message.subject.clone(),
                sender,
                to_list: message.to_list.clone(),
                cc_list: message.cc_list.clone(),
                bcc_list: message.bcc_list.clone(),
                body: armored_body,
                mime_type: message.mime_type,
                external_id: message.external_id.clone(),
            },
            parent_id,
        })
        .await?;
    debug!(draft = %draft.id, "Draft created");

    let attachment_keys =
        create_attachments(client, addr_kr, &draft.id, &message.attachments).await?;

    Ok((draft, attachment_keys))
}

// Uploads run in parallel with bounded concurrency; the first failure drops
// the in-flight siblings and surfaces alone. A failed upload leaves the
// draft for server-side garbage collection.
async fn create_attachments(
    client: &dyn DirectoryClient,
    addr_kr: &KeyRing,
    draft_id: &str,
    attachments: &[Attachment],
) -> Result<HashMap<String, SessionKey>, SendError> {
    let parallelism = std::thread::available_parallelism().map_or(4, NonZeroUsize::get);

    let pending: Vec<Pin<Box<dyn Future<Output = Result<(String, SessionKey), SendError>> + Send + '_>>> =
        attachments
            .iter()
            .map(|attachment| {
                Box::pin(upload_attachment(client, addr_kr, draft_id, attachment))
                    as Pin<Box<dyn Future<Output = _> + Send + '_>>
            })
            .collect();

    let keys: Vec<(String, SessionKey)> = stream::iter(pending)
        .buffer_unordered(parallelism)
        .try_collect()
        .await?;

    Ok(keys.into_iter().collect())
}

async fn upload_attachment(
    client: &dyn DirectoryClient,
    addr_kr: &KeyRing,
    draft_id: &str,
    attachment: &Attachment,
) -> Result<(String, SessionKey), SendError> {
    let signature = addr_kr.sign_detached(&attachment.data)?;
    let encrypted = addr_kr.encrypt_attachment(&attachment.name, &attachment.data)?;

    let uploaded = client
        .upload_attachment(CreateAttachmentReq {
            message_id: draft_id.to_owned(),
            filename: attachment.name.clone(),
            mime_type: attachment.mime_type.clone(),
            disposition: attachment.disposition,
            content_id: attachment.content_id.clone(),
            key_packets: BASE64.encode(&encrypted.key_packet),
            data_packet: BASE64.encode(&encrypted.data_packet),
            signature: BASE64.encode(&signature),
        })
        .await?;

    // Recover the session key from the server's echo so the package
    // assembler can re-seal it per recipient.
    let key_packet = BASE64
        .decode(uploaded.key_packets.as_bytes())
        .map_err(|_| SendError::Crypto(CryptoError::Decrypt))?;
    let session_key = addr_kr.decrypt_session_key(&key_packet)?;

    Ok((uploaded.id, session_key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::fake_client;
    use pelican_core::api::Disposition;
    use pelican_deps::tokio;

    #[tokio::test]
    async fn draft_carries_headers_and_parent() {
        let client = fake_client();
        let addr_kr = KeyRing::generate("Alice@svc.test");

        let mut message =
            pelican_core::message::Message::parse(b"From: <alice@svc.test>\r\nSubject: hi\r\n\r\nbody")
                .expect("parse");
        crate::send::sanitize(
            &mut message,
            "alice@svc.test",
            &[String::from("bob@svc.test")],
            &[String::from("Alice@svc.test")],
        )
        .expect("sanitize");

        let armored = addr_kr
            .encrypt_armored_signed(message.rich_body.as_bytes())
            .expect("body");
        let (draft, keys) = create_draft_with_attachments(
            client.as_ref(),
            &addr_kr,
            &message,
            Some(String::from("parent-1")),
            armored,
        )
        .await
        .expect("draft");

        assert_eq!(draft.id, "draft-1");
        assert!(keys.is_empty());

        let drafts = client.drafts.lock().expect("lock");
        assert_eq!(drafts[0].parent_id.as_deref(), Some("parent-1"));
        assert_eq!(drafts[0].message.subject, "hi");
        assert_eq!(drafts[0].message.sender.address, "Alice@svc.test");
        assert_eq!(drafts[0].message.bcc_list[0].address, "bob@svc.test");
    }

    #[tokio::test]
    async fn attachment_session_keys_are_keyed_by_server_id() {
        let client = fake_client();
        let addr_kr = KeyRing::generate("Alice@svc.test");

        let attachments = vec![
            Attachment {
                name: String::from("a.txt"),
                mime_type: String::from("text/plain"),
                disposition: Disposition::Attachment,
                content_id: None,
                data: b"first".to_vec(),
            },
            Attachment {
                name: String::from("b.txt"),
                mime_type: String::from("text/plain"),
                disposition: Disposition::Inline,
                content_id: Some(String::from("cid-b")),
                data: b"second".to_vec(),
            },
        ];

        let keys = create_attachments(client.as_ref(), &addr_kr, "draft-1", &attachments)
            .await
            .expect("upload");
        assert_eq!(keys.len(), 2);

        // Processing is unordered; ids key the map so order is irrelevant.
        let uploads = client.uploads.lock().expect("lock");
        assert_eq!(uploads.len(), 2);
        for (idx, upload) in uploads.iter().enumerate() {
            let id = format!("att-{}", idx + 1);
            let session_key = keys.get(&id).expect("key for upload");
            let data_packet = BASE64
                .decode(upload.data_packet.as_bytes())
                .expect("packet");
            let plaintext = session_key
                .decrypt(&data_packet, &upload.filename)
                .expect("decrypt");
            assert!(plaintext == b"first" || plaintext == b"second");
        }
    }
}
