// SPDX-FileCopyrightText: 2024 The pelican developers
//
// SPDX-License-Identifier: Apache-2.0

//! Types and the client seam for the upstream directory API.
//!
//! All upstream calls go through [`DirectoryClient`]; tests substitute an
//! in-memory fake, the gateway wires in the HTTP implementation.

use std::collections::BTreeMap;

use pelican_deps::{
    async_trait::async_trait,
    base64::{engine::general_purpose::STANDARD as BASE64, Engine as _},
    serde::{self, Deserialize, Serialize},
};
use thiserror::Error;

use crate::crypto::{CryptoError, KeyRing, PublicKey};

/// HTTP implementation of the directory client
pub mod http;

/// A string-keyed multimap narrowing metadata queries. The `AddressID`
/// filter is added if and only if the session's address mode is split.
pub type Filter = BTreeMap<String, Vec<String>>;

/// Errors of the directory client.
#[derive(Error, Debug)]
pub enum ApiError {
    /// The request never completed.
    #[error("api request failed: {0}")]
    Network(#[from] pelican_deps::reqwest::Error),
    /// The service answered with a non-success status.
    #[error("api returned status {0}")]
    Status(u16),
    /// The response body could not be decoded.
    #[error("failed to decode api response: {0}")]
    Decode(String),
}

impl ApiError {
    /// Whether the failure is worth a client retry.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::Status(status) => *status >= 500 || *status == 429,
            Self::Decode(_) => false,
        }
    }
}

/// Whether a recipient lives on the same mail service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(crate = "self::serde")]
pub enum RecipientType {
    /// Same mail service; always encrypted.
    Internal,
    /// Anywhere else.
    External,
}

/// The cryptographic shape of one recipient's copy of the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Hash)]
#[serde(crate = "self::serde", rename_all = "kebab-case")]
pub enum Scheme {
    /// Internal end-to-end encryption.
    Internal,
    /// PGP/MIME to an external recipient.
    PgpMime,
    /// Inline PGP to an external recipient.
    PgpInline,
    /// Signed cleartext MIME.
    CleartextMime,
    /// Signed inline cleartext.
    CleartextInline,
    /// No signature, no encryption.
    Plain,
}

impl Scheme {
    /// Whether the scheme re-encrypts the session key per recipient.
    #[must_use]
    pub const fn encrypts(self) -> bool {
        matches!(self, Self::Internal | Self::PgpMime | Self::PgpInline)
    }

    /// Whether the scheme carries a detached signature without encryption.
    #[must_use]
    pub const fn signs_cleartext(self) -> bool {
        matches!(self, Self::CleartextMime | Self::CleartextInline)
    }
}

impl std::str::FromStr for Scheme {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "internal" => Ok(Self::Internal),
            "pgp-mime" => Ok(Self::PgpMime),
            "pgp-inline" => Ok(Self::PgpInline),
            "cleartext-mime" => Ok(Self::CleartextMime),
            "cleartext-inline" => Ok(Self::CleartextInline),
            "plain" => Ok(Self::Plain),
            _ => Err(()),
        }
    }
}

/// The MIME projection carried by a body or package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Hash)]
#[serde(crate = "self::serde")]
pub enum MimeType {
    /// `text/plain`
    #[serde(rename = "text/plain")]
    TextPlain,
    /// `text/html`
    #[serde(rename = "text/html")]
    TextHtml,
    /// `multipart/mixed`
    #[serde(rename = "multipart/mixed")]
    MultipartMixed,
}

impl MimeType {
    /// The wire representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TextPlain => "text/plain",
            Self::TextHtml => "text/html",
            Self::MultipartMixed => "multipart/mixed",
        }
    }
}

impl std::str::FromStr for MimeType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text/plain" => Ok(Self::TextPlain),
            "text/html" => Ok(Self::TextHtml),
            "multipart/mixed" => Ok(Self::MultipartMixed),
            _ => Err(()),
        }
    }
}

/// Attachment disposition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(crate = "self::serde", rename_all = "lowercase")]
pub enum Disposition {
    /// A regular attachment.
    Attachment,
    /// An inline part, keyed by `Content-ID`.
    Inline,
}

/// The user's mail settings, fixed for the lifetime of a session.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(crate = "self::serde")]
pub struct MailSettings {
    /// Sign outgoing cleartext mail.
    #[serde(default)]
    pub sign: bool,
    /// Encrypt to external recipients whose keys the directory advertises.
    #[serde(default)]
    pub pgp_external: bool,
    /// Attach the sender's public key to outgoing messages.
    #[serde(default)]
    pub attach_public_key: bool,
}

/// The concrete send mode for one recipient. Derived during assembly and
/// never persisted.
#[derive(Debug, Clone)]
pub struct SendPreferences {
    /// The resolved scheme.
    pub scheme: Scheme,
    /// Whether the copy must be signed.
    pub sign: bool,
    /// The MIME projection of the copy.
    pub mime_type: MimeType,
    /// The key the session key is sealed to, for encrypting schemes.
    pub public_key: Option<PublicKey>,
    /// Whether the key was pinned by a contact, overriding the directory.
    pub pinned: bool,
}

/// One email address with an optional display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(crate = "self::serde", rename_all = "PascalCase")]
pub struct EmailAddress {
    /// Display name, possibly empty.
    #[serde(default)]
    pub name: String,
    /// The bare address.
    pub address: String,
}

/// Metadata of one stored message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(crate = "self::serde", rename_all = "PascalCase")]
pub struct MessageMetadata {
    /// The message id.
    #[serde(rename = "ID")]
    pub id: String,
    /// The owning address.
    #[serde(rename = "AddressID")]
    pub address_id: String,
    /// The external message id, if any.
    #[serde(rename = "ExternalID", default)]
    pub external_id: Option<String>,
    /// Whether the message is an unsent draft.
    pub is_draft: bool,
}

/// The draft headers and body sent to the service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(crate = "self::serde", rename_all = "PascalCase")]
pub struct DraftTemplate {
    /// Message subject.
    pub subject: String,
    /// The sending address.
    pub sender: EmailAddress,
    /// Visible recipients.
    pub to_list: Vec<EmailAddress>,
    /// Carbon-copy recipients.
    #[serde(rename = "CCList")]
    pub cc_list: Vec<EmailAddress>,
    /// Blind recipients.
    #[serde(rename = "BCCList")]
    pub bcc_list: Vec<EmailAddress>,
    /// The armored, signed-and-encrypted body.
    pub body: String,
    /// The body's MIME projection.
    #[serde(rename = "MIMEType")]
    pub mime_type: MimeType,
    /// The external message id, if the client supplied one.
    #[serde(rename = "ExternalID", default)]
    pub external_id: Option<String>,
}

/// Request creating a server-side draft.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(crate = "self::serde", rename_all = "PascalCase")]
pub struct CreateDraftReq {
    /// The draft content.
    pub message: DraftTemplate,
    /// The message this draft replies to, if resolved.
    #[serde(rename = "ParentID", default)]
    pub parent_id: Option<String>,
}

/// A created draft.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(crate = "self::serde", rename_all = "PascalCase")]
pub struct DraftMessage {
    /// The draft's message id.
    #[serde(rename = "ID")]
    pub id: String,
}

/// Request uploading one encrypted attachment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(crate = "self::serde", rename_all = "PascalCase")]
pub struct CreateAttachmentReq {
    /// The draft the attachment belongs to.
    #[serde(rename = "MessageID")]
    pub message_id: String,
    /// The attachment filename.
    pub filename: String,
    /// The attachment MIME type.
    #[serde(rename = "MIMEType")]
    pub mime_type: String,
    /// Attachment or inline.
    pub disposition: Disposition,
    /// `Content-ID` for inline parts.
    #[serde(rename = "ContentID", default)]
    pub content_id: Option<String>,
    /// The session key sealed to the sending address, base64.
    pub key_packets: String,
    /// The encrypted payload, base64.
    pub data_packet: String,
    /// Detached signature over the plaintext, base64.
    pub signature: String,
}

/// A stored attachment as echoed by the service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(crate = "self::serde", rename_all = "PascalCase")]
pub struct AttachmentMeta {
    /// The server-assigned attachment id.
    #[serde(rename = "ID")]
    pub id: String,
    /// The key packets as stored, base64.
    pub key_packets: String,
}

/// Key material and metadata for one recipient of one package.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(crate = "self::serde", rename_all = "PascalCase")]
pub struct PackageRecipient {
    /// The body session key sealed to this recipient, base64. Absent for
    /// cleartext schemes.
    #[serde(default)]
    pub body_key_packet: Option<String>,
    /// Attachment session keys sealed to this recipient, by attachment id.
    #[serde(default)]
    pub attachment_key_packets: BTreeMap<String, String>,
}

/// One entry of the multi-scheme send request; groups recipients sharing a
/// scheme and MIME projection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(crate = "self::serde", rename_all = "PascalCase")]
pub struct Package {
    /// The scheme shared by all recipients of the package.
    pub scheme: Scheme,
    /// The MIME projection of the package body.
    #[serde(rename = "MIMEType")]
    pub mime_type: MimeType,
    /// Per-recipient key material, keyed by email.
    pub addresses: BTreeMap<String, PackageRecipient>,
    /// The package body: base64 data packet for encrypting schemes,
    /// cleartext otherwise.
    pub body: String,
    /// Detached signature over the body for signing schemes, base64.
    #[serde(default)]
    pub body_signature: Option<String>,
}

/// The multi-scheme send request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(crate = "self::serde", rename_all = "PascalCase")]
pub struct SendReq {
    /// One package per distinct `(scheme, mime type)` tuple.
    pub packages: Vec<Package>,
}

/// A sent message as acknowledged by the service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(crate = "self::serde", rename_all = "PascalCase")]
pub struct SentMessage {
    /// The final message id.
    #[serde(rename = "ID")]
    pub id: String,
}

/// A contact email entry pointing at its contact record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(crate = "self::serde", rename_all = "PascalCase")]
pub struct ContactEmail {
    /// The contact's email.
    pub email: String,
    /// The owning contact record.
    #[serde(rename = "ContactID")]
    pub contact_id: String,
}

/// How a contact card is protected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(crate = "self::serde", rename_all = "lowercase")]
pub enum CardType {
    /// Unprotected card.
    Cleartext,
    /// Signed but readable card.
    Signed,
    /// Card encrypted to the user keyring.
    Encrypted,
}

/// One card of a contact record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(crate = "self::serde", rename_all = "PascalCase")]
pub struct ContactCard {
    /// The card protection.
    #[serde(rename = "Type")]
    pub card_type: CardType,
    /// The card payload: vCard text, armored when encrypted.
    pub data: String,
}

/// A stored contact.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(crate = "self::serde", rename_all = "PascalCase")]
pub struct Contact {
    /// The contact id.
    #[serde(rename = "ID")]
    pub id: String,
    /// The contact's cards.
    pub cards: Vec<ContactCard>,
}

/// Per-contact send settings parsed from vCard-style cards. Absent fields
/// fall through to mailbox settings.
#[derive(Debug, Clone, Default)]
pub struct ContactSettings {
    /// A pinned scheme, if the contact names one.
    pub scheme: Option<Scheme>,
    /// A preferred MIME projection.
    pub mime_type: Option<MimeType>,
    /// A per-contact signing override.
    pub sign: Option<bool>,
    /// Public keys stored with the contact.
    pub keys: Vec<PublicKey>,
    /// Whether the contact keys override the directory.
    pub pinned: bool,
}

impl ContactSettings {
    /// Parses a vCard-style card body. Unknown properties are ignored.
    #[must_use]
    pub fn parse(card: &str) -> Self {
        let mut settings = Self::default();
        for line in card.lines() {
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim();
            match key.trim().to_ascii_uppercase().as_str() {
                "X-PELICAN-SCHEME" => settings.scheme = value.parse().ok(),
                "X-PELICAN-MIMETYPE" => settings.mime_type = value.parse().ok(),
                "X-PELICAN-SIGN" => settings.sign = Some(value.eq_ignore_ascii_case("true")),
                "X-PELICAN-KEY-PINNED" => settings.pinned = value.eq_ignore_ascii_case("true"),
                "KEY" => {
                    if let Some(key) = BASE64
                        .decode(value.as_bytes())
                        .ok()
                        .and_then(|sec1| PublicKey::from_sec1_bytes(&sec1).ok())
                    {
                        settings.keys.push(key);
                    }
                }
                _ => {}
            }
        }
        settings
    }
}

impl Contact {
    /// Decrypts and parses the contact's send settings, folding all cards.
    pub fn settings(&self, user_kr: &KeyRing) -> Result<ContactSettings, CryptoError> {
        let mut merged = ContactSettings::default();
        for card in &self.cards {
            let body = match card.card_type {
                CardType::Cleartext | CardType::Signed => card.data.clone(),
                CardType::Encrypted => {
                    String::from_utf8(user_kr.decrypt_armored(&card.data)?)
                        .map_err(|_| CryptoError::Decrypt)?
                }
            };
            let parsed = ContactSettings::parse(&body);
            merged.scheme = parsed.scheme.or(merged.scheme);
            merged.mime_type = parsed.mime_type.or(merged.mime_type);
            merged.sign = parsed.sign.or(merged.sign);
            merged.pinned |= parsed.pinned;
            merged.keys.extend(parsed.keys);
        }
        Ok(merged)
    }
}

/// The upstream REST surface consumed by the send pipeline.
#[async_trait]
pub trait DirectoryClient: Send + Sync {
    /// Queries message metadata matching the filter.
    async fn get_all_message_metadata(
        &self,
        filter: &Filter,
    ) -> Result<Vec<MessageMetadata>, ApiError>;

    /// Looks up a recipient's advertised public keys and type.
    async fn get_public_keys(
        &self,
        email: &str,
    ) -> Result<(Vec<PublicKey>, RecipientType), ApiError>;

    /// Lists contact email entries matching `email`.
    async fn get_all_contact_emails(&self, email: &str) -> Result<Vec<ContactEmail>, ApiError>;

    /// Fetches one contact record.
    async fn get_contact(&self, id: &str) -> Result<Contact, ApiError>;

    /// Creates a draft on the server.
    async fn create_draft(&self, req: CreateDraftReq) -> Result<DraftMessage, ApiError>;

    /// Uploads one encrypted attachment.
    async fn upload_attachment(&self, req: CreateAttachmentReq)
        -> Result<AttachmentMeta, ApiError>;

    /// Submits a draft with its send packages.
    async fn send_draft(&self, draft_id: &str, req: SendReq) -> Result<SentMessage, ApiError>;

    /// Deletes a message (used to clear stale drafts while threading).
    async fn delete_message(&self, id: &str) -> Result<(), ApiError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contact_settings_parse() {
        let card = "BEGIN:VCARD\r\nX-PELICAN-SCHEME:pgp-mime\r\nX-PELICAN-SIGN:true\r\nX-PELICAN-KEY-PINNED:true\r\nEND:VCARD";
        let settings = ContactSettings::parse(card);
        assert_eq!(settings.scheme, Some(Scheme::PgpMime));
        assert_eq!(settings.sign, Some(true));
        assert!(settings.pinned);
        assert!(settings.keys.is_empty());
    }

    #[test]
    fn encrypted_card_round_trip() {
        let user_kr = KeyRing::generate("alice@svc.test");
        let card = "X-PELICAN-SCHEME:pgp-inline\r\nX-PELICAN-MIMETYPE:text/plain";
        let armored = user_kr
            .encrypt_armored_signed(card.as_bytes())
            .expect("encrypt card");

        let contact = Contact {
            id: "c1".into(),
            cards: vec![ContactCard {
                card_type: CardType::Encrypted,
                data: armored,
            }],
        };
        let settings = contact.settings(&user_kr).expect("settings");
        assert_eq!(settings.scheme, Some(Scheme::PgpInline));
        assert_eq!(settings.mime_type, Some(MimeType::TextPlain));
    }

    #[test]
    fn scheme_encrypts() {
        assert!(Scheme::Internal.encrypts());
        assert!(Scheme::PgpMime.encrypts());
        assert!(Scheme::PgpInline.encrypts());
        assert!(!Scheme::CleartextMime.encrypts());
        assert!(!Scheme::Plain.encrypts());
    }
}
