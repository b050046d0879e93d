// SPDX-FileCopyrightText: 2024 The pelican developers
//
// SPDX-License-Identifier: Apache-2.0

//! Assembly of the multi-scheme send request.
//!
//! Recipients sharing a `(scheme, mime type)` tuple form one package. Each
//! encrypting package gets a fresh body session key sealed once per
//! recipient; attachment session keys are re-sealed the same way.
//! Cleartext packages carry a detached signature and no key packets; plain
//! packages carry neither.

use std::collections::{BTreeMap, HashMap};

use pelican_deps::base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};

use pelican_core::{
    api::{MimeType, Package, PackageRecipient, Scheme, SendPreferences, SendReq},
    crypto::{KeyRing, SessionKey},
};

use crate::error::SendError;

pub(crate) fn create_send_req(
    addr_kr: &KeyRing,
    mime_body: &str,
    rich_body: &str,
    plain_body: &str,
    recipients: &[(String, SendPreferences)],
    attachment_keys: &HashMap<String, SessionKey>,
) -> Result<SendReq, SendError> {
    let mut groups: Vec<((Scheme, MimeType), Vec<&(String, SendPreferences)>)> = Vec::new();
    for recipient in recipients {
        let key = (recipient.1.scheme, recipient.1.mime_type);
        match groups.iter_mut().find(|(existing, _)| *existing == key) {
            Some((_, members)) => members.push(recipient),
            None => groups.push((key, vec![recipient])),
        }
    }

    let mut packages = Vec::with_capacity(groups.len());
    for ((scheme, mime_type), members) in groups {
        let body = match mime_type {
            MimeType::MultipartMixed => mime_body,
            MimeType::TextHtml => rich_body,
            MimeType::TextPlain => plain_body,
        };

        let mut addresses = BTreeMap::new();
        let mut package = Package {
            scheme,
            mime_type,
            addresses: BTreeMap::new(),
            body: String::new(),
            body_signature: None,
        };

        if scheme.encrypts() {
            let session_key = SessionKey::generate();
            package.body = BASE64.encode(session_key.encrypt(body.as_bytes(), "")?);
            package.body_signature =
                Some(BASE64.encode(addr_kr.sign_detached(body.as_bytes())?));

            for (email, prefs) in members {
                let public_key = prefs
                    .public_key
                    .as_ref()
                    .ok_or_else(|| SendError::MissingRecipientKey(email.clone()))?;

                let mut recipient = PackageRecipient {
                    body_key_packet: Some(BASE64.encode(session_key.seal_to(public_key)?)),
                    attachment_key_packets: BTreeMap::new(),
                };
                for (attachment_id, attachment_key) in attachment_keys {
                    recipient.attachment_key_packets.insert(
                        attachment_id.clone(),
                        BASE64.encode(attachment_key.seal_to(public_key)?),
                    );
                }
                addresses.insert(email.clone(), recipient);
            }
        } else {
            package.body = body.to_owned();
            if scheme.signs_cleartext() {
                package.body_signature =
                    Some(BASE64.encode(addr_kr.sign_detached(body.as_bytes())?));
            }
            for (email, _) in members {
                addresses.insert(email.clone(), PackageRecipient::default());
            }
        }

        package.addresses = addresses;
        packages.push(package);
    }

    Ok(SendReq { packages })
}
