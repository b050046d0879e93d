// SPDX-FileCopyrightText: 2024 The pelican developers
//
// SPDX-License-Identifier: Apache-2.0

//! Per-recipient fusion of contact settings, mailbox settings and the
//! public-key directory into a concrete send preference.

use std::{future::Future, num::NonZeroUsize, pin::Pin};

use pelican_deps::{
    futures::{stream, StreamExt, TryStreamExt},
    tracing::{self, instrument},
};

use pelican_core::{
    api::{
        ContactSettings, DirectoryClient, MailSettings, MimeType, RecipientType, Scheme,
        SendPreferences,
    },
    crypto::{KeyRing, PublicKey},
};

use crate::error::SendError;

/// Resolves the send preference for every recipient, in parallel with
/// bounded concurrency. The returned list preserves recipient order.
#[instrument(skip(client, user_kr, settings, addresses))]
pub(crate) async fn get_recipients(
    client: &dyn DirectoryClient,
    user_kr: &KeyRing,
    settings: MailSettings,
    addresses: &[String],
    message_mime: MimeType,
    html: bool,
) -> Result<Vec<(String, SendPreferences)>, SendError> {
    let parallelism = std::thread::available_parallelism().map_or(4, NonZeroUsize::get);

    let pending: Vec<Pin<Box<dyn Future<Output = Result<(usize, SendPreferences), SendError>> + Send + '_>>> =
        addresses
            .iter()
            .enumerate()
            .map(|(idx, address)| {
                Box::pin(resolve_indexed_prefs(
                    idx,
                    client,
                    user_kr,
                    settings,
                    address,
                    message_mime,
                    html,
                )) as Pin<Box<dyn Future<Output = _> + Send + '_>>
            })
            .collect();

    let indexed: Vec<(usize, SendPreferences)> = stream::iter(pending)
        .buffer_unordered(parallelism)
        .try_collect()
        .await?;

    let mut ordered: Vec<Option<SendPreferences>> = vec![None; addresses.len()];
    for (idx, prefs) in indexed {
        ordered[idx] = Some(prefs);
    }
    Ok(addresses
        .iter()
        .cloned()
        .zip(ordered.into_iter().flatten())
        .collect())
}

async fn resolve_indexed_prefs(
    idx: usize,
    client: &dyn DirectoryClient,
    user_kr: &KeyRing,
    settings: MailSettings,
    address: &str,
    message_mime: MimeType,
    html: bool,
) -> Result<(usize, SendPreferences), SendError> {
    let prefs = get_send_prefs(client, user_kr, settings, address, message_mime, html).await?;
    Ok((idx, prefs))
}

async fn get_send_prefs(
    client: &dyn DirectoryClient,
    user_kr: &KeyRing,
    settings: MailSettings,
    recipient: &str,
    message_mime: MimeType,
    html: bool,
) -> Result<SendPreferences, SendError> {
    let (keys, recipient_type) = client.get_public_keys(recipient).await?;
    let contact = get_contact_settings(client, user_kr, recipient).await?;
    build_send_prefs(
        &contact,
        settings,
        &keys,
        recipient,
        message_mime,
        html,
        recipient_type == RecipientType::Internal,
    )
}

// A recipient without a stored contact gets an empty settings object.
async fn get_contact_settings(
    client: &dyn DirectoryClient,
    user_kr: &KeyRing,
    recipient: &str,
) -> Result<ContactSettings, SendError> {
    let contacts = client.get_all_contact_emails(recipient).await?;
    let Some(entry) = contacts.iter().find(|contact| contact.email == recipient) else {
        return Ok(ContactSettings::default());
    };
    let contact = client.get_contact(&entry.contact_id).await?;
    Ok(contact.settings(user_kr)?)
}

fn build_send_prefs(
    contact: &ContactSettings,
    settings: MailSettings,
    directory_keys: &[PublicKey],
    recipient: &str,
    message_mime: MimeType,
    html: bool,
    internal: bool,
) -> Result<SendPreferences, SendError> {
    // Internal recipients are always encrypted and signed; the MIME type
    // is inherited from the message.
    if internal {
        let key = directory_keys
            .first()
            .cloned()
            .ok_or_else(|| SendError::MissingRecipientKey(recipient.to_owned()))?;
        return Ok(SendPreferences {
            scheme: Scheme::Internal,
            sign: true,
            mime_type: message_mime,
            public_key: Some(key),
            pinned: false,
        });
    }

    // A contact that pins both a scheme and a key wins next. A non-pinned
    // contact key must be among the directory keys.
    if let (Some(scheme), Some(key)) = (contact.scheme, contact.keys.first()) {
        if scheme.encrypts() {
            if !contact.pinned
                && !directory_keys
                    .iter()
                    .any(|advertised| advertised.fingerprint() == key.fingerprint())
            {
                return Err(SendError::KeyMismatch(recipient.to_owned()));
            }
            let mime_type = contact.mime_type.unwrap_or(match scheme {
                Scheme::PgpMime => MimeType::MultipartMixed,
                Scheme::PgpInline => MimeType::TextPlain,
                _ => message_mime,
            });
            return Ok(SendPreferences {
                scheme,
                sign: true,
                mime_type,
                public_key: Some(key.clone()),
                pinned: contact.pinned,
            });
        }
        let sign = contact.sign.unwrap_or(settings.sign);
        return Ok(SendPreferences {
            scheme,
            sign,
            mime_type: contact.mime_type.unwrap_or(if scheme == Scheme::CleartextMime {
                MimeType::MultipartMixed
            } else {
                MimeType::TextPlain
            }),
            public_key: None,
            pinned: false,
        });
    }

    // Mailbox-level PGP for external recipients with advertised keys.
    if settings.pgp_external && !directory_keys.is_empty() {
        let (scheme, mime_type) = if html {
            (Scheme::PgpMime, MimeType::MultipartMixed)
        } else {
            (Scheme::PgpInline, MimeType::TextPlain)
        };
        return Ok(SendPreferences {
            scheme,
            sign: true,
            mime_type,
            public_key: directory_keys.first().cloned(),
            pinned: false,
        });
    }

    // Cleartext: signed MIME when signing is enabled, plain otherwise.
    if contact.sign.unwrap_or(settings.sign) {
        Ok(SendPreferences {
            scheme: Scheme::CleartextMime,
            sign: true,
            mime_type: MimeType::MultipartMixed,
            public_key: None,
            pinned: false,
        })
    } else {
        Ok(SendPreferences {
            scheme: Scheme::Plain,
            sign: false,
            mime_type: if html {
                MimeType::TextHtml
            } else {
                MimeType::TextPlain
            },
            public_key: None,
            pinned: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{external_keys, fake_client, internal_keys};
    use pelican_core::api::{CardType, Contact, ContactCard, ContactEmail};
    use pelican_deps::{
        base64::{engine::general_purpose::STANDARD as BASE64, Engine as _},
        tokio,
    };

    fn empty_contact() -> ContactSettings {
        ContactSettings::default()
    }

    #[test]
    fn internal_recipient_is_always_encrypted_and_signed() {
        let keys = internal_keys();
        let prefs = build_send_prefs(
            &empty_contact(),
            MailSettings::default(),
            &keys,
            "bob@svc.test",
            MimeType::TextHtml,
            true,
            true,
        )
        .expect("prefs");
        assert_eq!(prefs.scheme, Scheme::Internal);
        assert!(prefs.sign);
        assert_eq!(prefs.mime_type, MimeType::TextHtml);
        assert!(prefs.public_key.is_some());
    }

    #[test]
    fn internal_recipient_without_keys_is_an_error() {
        let err = build_send_prefs(
            &empty_contact(),
            MailSettings::default(),
            &[],
            "bob@svc.test",
            MimeType::TextPlain,
            false,
            true,
        )
        .expect_err("no key");
        assert!(matches!(err, SendError::MissingRecipientKey(_)));
    }

    #[test]
    fn pinned_contact_key_overrides_the_directory() {
        let pinned = external_keys();
        let contact = ContactSettings {
            scheme: Some(Scheme::PgpMime),
            keys: pinned.clone(),
            pinned: true,
            ..ContactSettings::default()
        };
        let prefs = build_send_prefs(
            &contact,
            MailSettings::default(),
            &[],
            "ext@example.org",
            MimeType::TextPlain,
            false,
            false,
        )
        .expect("prefs");
        assert_eq!(prefs.scheme, Scheme::PgpMime);
        assert_eq!(prefs.mime_type, MimeType::MultipartMixed);
        assert!(prefs.pinned);
        assert_eq!(
            prefs.public_key.expect("key").fingerprint(),
            pinned[0].fingerprint()
        );
    }

    #[test]
    fn non_pinned_contact_key_must_be_advertised() {
        let contact = ContactSettings {
            scheme: Some(Scheme::PgpInline),
            keys: external_keys(),
            pinned: false,
            ..ContactSettings::default()
        };
        // Directory advertises a different key.
        let err = build_send_prefs(
            &contact,
            MailSettings::default(),
            &external_keys(),
            "ext@example.org",
            MimeType::TextPlain,
            false,
            false,
        )
        .expect_err("mismatch");
        assert!(matches!(err, SendError::KeyMismatch(_)));
    }

    #[test]
    fn mailbox_pgp_uses_mime_for_html_and_inline_for_plain() {
        let settings = MailSettings {
            pgp_external: true,
            ..MailSettings::default()
        };
        let keys = external_keys();

        let prefs = build_send_prefs(
            &empty_contact(),
            settings,
            &keys,
            "ext@example.org",
            MimeType::TextHtml,
            true,
            false,
        )
        .expect("prefs");
        assert_eq!(prefs.scheme, Scheme::PgpMime);
        assert_eq!(prefs.mime_type, MimeType::MultipartMixed);

        let prefs = build_send_prefs(
            &empty_contact(),
            settings,
            &keys,
            "ext@example.org",
            MimeType::TextPlain,
            false,
            false,
        )
        .expect("prefs");
        assert_eq!(prefs.scheme, Scheme::PgpInline);
        assert_eq!(prefs.mime_type, MimeType::TextPlain);
    }

    #[test]
    fn cleartext_falls_back_to_plain_without_signing() {
        let prefs = build_send_prefs(
            &empty_contact(),
            MailSettings::default(),
            &[],
            "ext@example.org",
            MimeType::TextPlain,
            false,
            false,
        )
        .expect("prefs");
        assert_eq!(prefs.scheme, Scheme::Plain);
        assert!(!prefs.sign);
        assert!(prefs.public_key.is_none());

        let prefs = build_send_prefs(
            &empty_contact(),
            MailSettings {
                sign: true,
                ..MailSettings::default()
            },
            &[],
            "ext@example.org",
            MimeType::TextPlain,
            false,
            false,
        )
        .expect("prefs");
        assert_eq!(prefs.scheme, Scheme::CleartextMime);
        assert!(prefs.sign);
    }

    #[tokio::test]
    async fn recipient_order_is_preserved() {
        let client = fake_client();
        client.set_keys("bob@svc.test", internal_keys(), RecipientType::Internal);
        client.set_keys("ext@example.com", Vec::new(), RecipientType::External);

        let user_kr = KeyRing::generate("alice");
        let addresses = vec![
            String::from("ext@example.com"),
            String::from("bob@svc.test"),
        ];
        let recipients = get_recipients(
            client.as_ref(),
            &user_kr,
            MailSettings::default(),
            &addresses,
            MimeType::TextPlain,
            false,
        )
        .await
        .expect("resolve");

        assert_eq!(recipients.len(), 2);
        assert_eq!(recipients[0].0, "ext@example.com");
        assert_eq!(recipients[0].1.scheme, Scheme::Plain);
        assert_eq!(recipients[1].0, "bob@svc.test");
        assert_eq!(recipients[1].1.scheme, Scheme::Internal);
    }

    #[tokio::test]
    async fn contact_settings_flow_through_the_user_keyring() {
        let client = fake_client();
        client.set_keys("ext@example.org", Vec::new(), RecipientType::External);

        let user_kr = KeyRing::generate("alice");
        let pinned = external_keys();
        let card = format!(
            "X-PELICAN-SCHEME:pgp-inline\r\nX-PELICAN-KEY-PINNED:true\r\nKEY:{}",
            armored_payload(&pinned[0])
        );
        client.set_contact(
            "ext@example.org",
            ContactEmail {
                email: String::from("ext@example.org"),
                contact_id: String::from("c1"),
            },
            Contact {
                id: String::from("c1"),
                cards: vec![ContactCard {
                    card_type: CardType::Encrypted,
                    data: user_kr
                        .encrypt_armored_signed(card.as_bytes())
                        .expect("card"),
                }],
            },
        );

        let recipients = get_recipients(
            client.as_ref(),
            &user_kr,
            MailSettings::default(),
            &[String::from("ext@example.org")],
            MimeType::TextPlain,
            false,
        )
        .await
        .expect("resolve");
        assert_eq!(recipients[0].1.scheme, Scheme::PgpInline);
        assert!(recipients[0].1.pinned);
    }

    fn armored_payload(key: &PublicKey) -> String {
        key.armored()
            .lines()
            .filter(|line| !line.starts_with("-----"))
            .collect::<Vec<_>>()
            .join("")
    }

    #[test]
    fn b64_helper_is_consistent_with_card_keys() {
        // KEY properties carry base64 SEC1 bytes; the armored payload is
        // exactly that encoding.
        let key = &external_keys()[0];
        let payload = armored_payload(key);
        let sec1 = BASE64.decode(payload.as_bytes()).expect("decode");
        let parsed = PublicKey::from_sec1_bytes(&sec1).expect("parse");
        assert_eq!(parsed.fingerprint(), key.fingerprint());
    }
}
