// SPDX-FileCopyrightText: 2024 The pelican developers
//
// SPDX-License-Identifier: Apache-2.0

//! Parsed RFC 5322 messages and their projections.
//!
//! A message carries three body projections: `rich_body` (canonical HTML or
//! plain text), `plain_body` (text-only) and `mime_body` (a canonical
//! reserialization used for archival, on which the parser is a fixed point).

use thiserror::Error;

use crate::api::{Disposition, EmailAddress, MimeType};

mod builder;
mod parser;

/// The reserved DNS-like suffix marking message ids that originated inside
/// the service and can be looked up directly.
pub const INTERNAL_ID_DOMAIN: &str = "pelican.internalid";

/// Errors of the message parser.
#[derive(Error, Debug)]
pub enum ParseError {
    /// The byte stream was not parseable as a message.
    #[error("invalid mime: {0}")]
    Mime(String),
    /// No header block was found.
    #[error("message has no headers")]
    NoHeaders,
}

/// One attachment of a parsed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// The resolved filename.
    pub name: String,
    /// The attachment MIME type.
    pub mime_type: String,
    /// Attachment or inline.
    pub disposition: Disposition,
    /// `Content-ID` for inline parts, without angle brackets.
    pub content_id: Option<String>,
    /// The decoded payload.
    pub data: Vec<u8>,
}

/// A parsed message with its three projections.
#[derive(Debug, Clone)]
pub struct Message {
    /// The sending address from the `From` header, if present.
    pub sender: Option<EmailAddress>,
    /// Visible recipients.
    pub to_list: Vec<EmailAddress>,
    /// Carbon-copy recipients.
    pub cc_list: Vec<EmailAddress>,
    /// Blind recipients; populated during sanitization.
    pub bcc_list: Vec<EmailAddress>,
    /// The subject, RFC 2047 decoded.
    pub subject: String,
    /// Message ids from `References` (or `In-Reply-To` as fallback),
    /// without angle brackets, in header order.
    pub references: Vec<String>,
    /// The client-supplied `Message-ID`, without angle brackets.
    pub external_id: Option<String>,
    /// The message's MIME projection.
    pub mime_type: MimeType,
    /// Canonical HTML, or plain text for text-only messages.
    pub rich_body: String,
    /// The text-only projection.
    pub plain_body: String,
    /// The canonical MIME reserialization.
    pub mime_body: String,
    /// All attachments in document order.
    pub attachments: Vec<Attachment>,
    pub(crate) html: bool,
}

impl Message {
    /// Parses an arbitrary byte stream into a message.
    pub fn parse(raw: &[u8]) -> Result<Self, ParseError> {
        parser::parse(raw)
    }

    /// Whether the rich body is HTML.
    #[must_use]
    pub const fn is_html(&self) -> bool {
        self.html
    }

    /// All recipient addresses (`to ∪ cc ∪ bcc`), deduplicated, in header
    /// order.
    #[must_use]
    pub fn recipients(&self) -> Vec<String> {
        let mut seen = Vec::new();
        for addr in self
            .to_list
            .iter()
            .chain(&self.cc_list)
            .chain(&self.bcc_list)
        {
            if !seen.contains(&addr.address) {
                seen.push(addr.address.clone());
            }
        }
        seen
    }

    /// Attaches the sender's armored public key and rebuilds the MIME
    /// projection.
    pub fn attach_public_key(&mut self, armored_key: &str, name: &str) {
        self.attachments.push(Attachment {
            name: format!("{name}.asc"),
            mime_type: String::from("application/pelican-keys"),
            disposition: Disposition::Attachment,
            content_id: None,
            data: armored_key.as_bytes().to_vec(),
        });
        self.mime_type = MimeType::MultipartMixed;
        self.rebuild_mime();
    }

    /// Rebuilds `mime_body` from the current header and body state.
    pub fn rebuild_mime(&mut self) {
        self.mime_body = builder::build(self);
    }
}
