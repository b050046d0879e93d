// SPDX-FileCopyrightText: 2024 The pelican developers
//
// SPDX-License-Identifier: Apache-2.0

//! Canonical reserialization of a parsed message. The parser is a fixed
//! point on this output: reparsing it yields a structurally equal message.

use pelican_deps::{
    base64::{engine::general_purpose::STANDARD as BASE64, Engine as _},
    quoted_printable,
    sha2::{Digest, Sha256},
};

use crate::api::{Disposition, EmailAddress};

use super::{Attachment, Message};

pub(super) fn build(message: &Message) -> String {
    let mut out = String::new();
    if let Some(sender) = &message.sender {
        header(&mut out, "From", &format_address(sender));
    }
    if !message.to_list.is_empty() {
        header(&mut out, "To", &format_address_list(&message.to_list));
    }
    if !message.cc_list.is_empty() {
        header(&mut out, "Cc", &format_address_list(&message.cc_list));
    }
    header(&mut out, "Subject", &encode_header_text(&message.subject));
    if let Some(id) = &message.external_id {
        header(&mut out, "Message-ID", &format!("<{id}>"));
    }
    if !message.references.is_empty() {
        let refs: Vec<String> = message
            .references
            .iter()
            .map(|id| format!("<{id}>"))
            .collect();
        header(&mut out, "References", &refs.join(" "));
    }
    out.push_str("MIME-Version: 1.0\r\n");

    let boundary = boundary_of(message);
    if message.attachments.is_empty() {
        write_body(&mut out, message, &boundary);
    } else {
        out.push_str(&format!(
            "Content-Type: multipart/mixed; boundary=\"{boundary}\"\r\n\r\n"
        ));
        out.push_str(&format!("--{boundary}\r\n"));
        write_body(&mut out, message, &boundary);
        for attachment in &message.attachments {
            out.push_str(&format!("--{boundary}\r\n"));
            write_attachment(&mut out, attachment);
        }
        out.push_str(&format!("--{boundary}--\r\n"));
    }
    out
}

fn write_body(out: &mut String, message: &Message, boundary: &str) {
    if message.html {
        // Neither boundary may be a prefix of the other.
        let alt = format!("=-alt-{}", &boundary[2..]);
        out.push_str(&format!(
            "Content-Type: multipart/alternative; boundary=\"{alt}\"\r\n\r\n"
        ));
        out.push_str(&format!("--{alt}\r\n"));
        write_text_part(out, "text/plain", &message.plain_body);
        out.push_str(&format!("--{alt}\r\n"));
        write_text_part(out, "text/html", &message.rich_body);
        out.push_str(&format!("--{alt}--\r\n"));
    } else {
        write_text_part(out, "text/plain", &message.rich_body);
    }
}

fn write_text_part(out: &mut String, mimetype: &str, body: &str) {
    out.push_str(&format!("Content-Type: {mimetype}; charset=utf-8\r\n"));
    out.push_str("Content-Transfer-Encoding: quoted-printable\r\n\r\n");
    let encoded = quoted_printable::encode(body.replace('\n', "\r\n").as_bytes());
    out.push_str(&String::from_utf8_lossy(&encoded));
    out.push_str("\r\n");
}

fn write_attachment(out: &mut String, attachment: &Attachment) {
    let name = encode_param(&attachment.name);
    out.push_str(&format!(
        "Content-Type: {}; name={name}\r\n",
        attachment.mime_type
    ));
    out.push_str("Content-Transfer-Encoding: base64\r\n");
    let disposition = match attachment.disposition {
        Disposition::Attachment => "attachment",
        Disposition::Inline => "inline",
    };
    out.push_str(&format!(
        "Content-Disposition: {disposition}; filename={name}\r\n"
    ));
    if let Some(content_id) = &attachment.content_id {
        out.push_str(&format!("Content-ID: <{content_id}>\r\n"));
    }
    out.push_str("\r\n");
    let encoded = BASE64.encode(&attachment.data);
    for chunk in encoded.as_bytes().chunks(76) {
        out.push_str(&String::from_utf8_lossy(chunk));
        out.push_str("\r\n");
    }
}

fn header(out: &mut String, name: &str, value: &str) {
    out.push_str(&format!("{name}: {value}\r\n"));
}

fn format_address_list(addresses: &[EmailAddress]) -> String {
    addresses
        .iter()
        .map(format_address)
        .collect::<Vec<_>>()
        .join(", ")
}

fn format_address(address: &EmailAddress) -> String {
    if address.name.is_empty() {
        format!("<{}>", address.address)
    } else if address.name.is_ascii() {
        format!("\"{}\" <{}>", address.name.replace('"', "\\\""), address.address)
    } else {
        format!("{} <{}>", encode_word(&address.name), address.address)
    }
}

fn encode_header_text(text: &str) -> String {
    if text.is_ascii() && !text.contains(['\r', '\n']) {
        text.to_owned()
    } else {
        encode_word(text)
    }
}

fn encode_param(value: &str) -> String {
    if value.is_ascii() {
        format!("\"{}\"", value.replace('"', "\\\""))
    } else {
        encode_word(value)
    }
}

fn encode_word(text: &str) -> String {
    format!("=?utf-8?B?{}?=", BASE64.encode(text.as_bytes()))
}

// The boundary is derived from the content so serialization stays
// deterministic.
fn boundary_of(message: &Message) -> String {
    let mut hasher = Sha256::new();
    hasher.update(message.rich_body.as_bytes());
    hasher.update(message.plain_body.as_bytes());
    for attachment in &message.attachments {
        hasher.update(attachment.name.as_bytes());
        hasher.update(&attachment.data);
    }
    let digest = hasher.finalize();
    let mut out = String::from("=-");
    for byte in digest.iter().take(12) {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}
