// SPDX-FileCopyrightText: 2024 The pelican developers
//
// SPDX-License-Identifier: Apache-2.0

//! Stream parsing of arbitrary (and often malformed) RFC 5322/2045 input.

use pelican_deps::{
    base64::{engine::general_purpose::STANDARD as BASE64, Engine as _},
    chardetng::EncodingDetector,
    encoding_rs::{Encoding, UTF_8, WINDOWS_1252},
    mailparse::{self, DispositionType, MailAddr, MailHeader, MailHeaderMap, ParsedMail},
    quoted_printable,
};

use crate::api::{Disposition, EmailAddress, MimeType};

use super::{Attachment, Message, ParseError};

pub(super) fn parse(raw: &[u8]) -> Result<Message, ParseError> {
    let repaired = repair(raw);
    let mail =
        mailparse::parse_mail(&repaired).map_err(|e| ParseError::Mime(e.to_string()))?;
    if mail.headers.is_empty() {
        return Err(ParseError::NoHeaders);
    }

    let sender = parse_address_list(&mail.headers, "From").into_iter().next();
    let to_list = parse_address_list(&mail.headers, "To");
    let cc_list = parse_address_list(&mail.headers, "Cc");
    let bcc_list = parse_address_list(&mail.headers, "Bcc");
    let subject = mail.headers.get_first_value("Subject").unwrap_or_default();

    let mut references = mail
        .headers
        .get_first_value("References")
        .map(|value| parse_msgids(&value))
        .unwrap_or_default();
    if references.is_empty() {
        references = mail
            .headers
            .get_first_value("In-Reply-To")
            .map(|value| parse_msgids(&value))
            .unwrap_or_default();
    }
    let external_id = mail
        .headers
        .get_first_value("Message-ID")
        .and_then(|value| parse_msgids(&value).into_iter().next());

    let mut walk = Walk::default();
    collect(&mail, &mut walk)?;

    let (rich_body, html) = walk.rich.unwrap_or((String::new(), false));
    let plain_body = match (walk.plain, html) {
        (Some(plain), _) => plain,
        // An HTML body without a text alternative gets its projection
        // derived by stripping markup.
        (None, true) => html_to_text(&rich_body),
        (None, false) => rich_body.clone(),
    };
    let mime_type = if walk.attachments.is_empty() {
        if html {
            MimeType::TextHtml
        } else {
            MimeType::TextPlain
        }
    } else {
        MimeType::MultipartMixed
    };

    let mut message = Message {
        sender,
        to_list,
        cc_list,
        bcc_list,
        subject,
        references,
        external_id,
        mime_type,
        rich_body,
        plain_body,
        mime_body: String::new(),
        attachments: walk.attachments,
        html,
    };
    message.rebuild_mime();
    Ok(message)
}

// Drops anything preceding the first plausible header line, e.g. mbox
// separators or stray blank lines.
fn repair(raw: &[u8]) -> Vec<u8> {
    let mut start = 0;
    while start < raw.len() {
        let end = raw[start..]
            .iter()
            .position(|b| *b == b'\n')
            .map_or(raw.len(), |pos| start + pos + 1);
        let line = &raw[start..end];
        if is_header_line(line) {
            break;
        }
        start = end;
    }
    if start >= raw.len() {
        return raw.to_vec();
    }
    raw[start..].to_vec()
}

fn is_header_line(line: &[u8]) -> bool {
    let Some(colon) = line.iter().position(|b| *b == b':') else {
        return false;
    };
    colon > 0
        && line[..colon]
            .iter()
            .all(|b| (33..=126).contains(b) && *b != b':' && *b != b' ')
}

fn parse_address_list(headers: &[MailHeader<'_>], name: &str) -> Vec<EmailAddress> {
    let Some(value) = headers.get_first_value(name) else {
        return Vec::new();
    };
    let Ok(parsed) = mailparse::addrparse(&value) else {
        return Vec::new();
    };
    let mut out = Vec::new();
    for addr in parsed.iter() {
        match addr {
            MailAddr::Single(info) => out.push(EmailAddress {
                name: info.display_name.clone().unwrap_or_default(),
                address: info.addr.clone(),
            }),
            MailAddr::Group(group) => {
                for info in &group.addrs {
                    out.push(EmailAddress {
                        name: info.display_name.clone().unwrap_or_default(),
                        address: info.addr.clone(),
                    });
                }
            }
        }
    }
    out
}

fn parse_msgids(value: &str) -> Vec<String> {
    mailparse::msgidparse(value).map_or_else(
        |_| {
            value
                .split_whitespace()
                .map(|token| {
                    token
                        .trim_start_matches('<')
                        .trim_end_matches('>')
                        .to_owned()
                })
                .filter(|id| !id.is_empty())
                .collect()
        },
        |ids| ids.iter().cloned().collect(),
    )
}

#[derive(Default)]
struct Walk {
    rich: Option<(String, bool)>,
    plain: Option<String>,
    attachments: Vec<Attachment>,
}

fn collect(part: &ParsedMail<'_>, walk: &mut Walk) -> Result<(), ParseError> {
    let mimetype = part.ctype.mimetype.to_ascii_lowercase();
    let disposition = part.get_content_disposition().disposition;

    if mimetype == "multipart/alternative" {
        if walk.rich.is_none() {
            let (rich, plain) = resolve_alternative(part, walk)?;
            walk.rich = rich;
            if walk.plain.is_none() {
                walk.plain = plain;
            }
        } else {
            for sub in &part.subparts {
                collect(sub, walk)?;
            }
        }
    } else if mimetype.starts_with("multipart/") {
        for sub in &part.subparts {
            collect(sub, walk)?;
        }
    } else if matches!(disposition, DispositionType::Attachment) {
        push_attachment(part, walk)?;
    } else if (mimetype == "text/plain" || mimetype == "text/html") && walk.rich.is_none() {
        walk.rich = Some((decode_text(part)?, mimetype == "text/html"));
    } else {
        // Non-text parts and trailing text parts travel as attachments.
        push_attachment(part, walk)?;
    }
    Ok(())
}

// Chooses the richest body of a multipart/alternative, recursing so that
// the deepest rich variant wins. Inline material hanging off a nested
// multipart (e.g. multipart/related images) lands in the attachment list.
fn resolve_alternative(
    part: &ParsedMail<'_>,
    walk: &mut Walk,
) -> Result<(Option<(String, bool)>, Option<String>), ParseError> {
    let mut rich: Option<(String, bool)> = None;
    let mut plain: Option<String> = None;
    for sub in &part.subparts {
        let mimetype = sub.ctype.mimetype.to_ascii_lowercase();
        if mimetype == "multipart/alternative" {
            let (nested_rich, nested_plain) = resolve_alternative(sub, walk)?;
            if nested_rich.is_some() {
                rich = nested_rich;
            }
            if plain.is_none() {
                plain = nested_plain;
            }
        } else if mimetype.starts_with("multipart/") {
            let mut nested = Walk::default();
            for inner in &sub.subparts {
                collect(inner, &mut nested)?;
            }
            if let Some((body, is_html)) = nested.rich {
                if is_html || rich.is_none() {
                    rich = Some((body, is_html));
                }
            }
            walk.attachments.extend(nested.attachments);
        } else if mimetype == "text/html" {
            rich = Some((decode_text(sub)?, true));
        } else if mimetype == "text/plain" {
            let text = decode_text(sub)?;
            if rich.is_none() {
                rich = Some((text.clone(), false));
            }
            if plain.is_none() {
                plain = Some(text);
            }
        } else {
            push_attachment(sub, walk)?;
        }
    }
    Ok((rich, plain))
}

fn push_attachment(part: &ParsedMail<'_>, walk: &mut Walk) -> Result<(), ParseError> {
    let content_id = raw_header(part, "Content-ID").map(|value| {
        value
            .trim()
            .trim_start_matches('<')
            .trim_end_matches('>')
            .to_owned()
    });
    let disposition = match part.get_content_disposition().disposition {
        DispositionType::Attachment => Disposition::Attachment,
        _ => {
            if content_id.is_some() {
                Disposition::Inline
            } else {
                Disposition::Attachment
            }
        }
    };
    walk.attachments.push(Attachment {
        name: resolve_filename(part).unwrap_or_else(|| String::from("attachment.bin")),
        mime_type: part.ctype.mimetype.to_ascii_lowercase(),
        disposition,
        content_id,
        data: part
            .get_body_raw()
            .map_err(|e| ParseError::Mime(e.to_string()))?,
    });
    Ok(())
}

/// Decodes a text part. The charset recovery order is: declared `charset`
/// parameter, then BOM sniffing, then a statistical guess. An unknown
/// declared charset is read as latin-1. A `<meta charset>` inside HTML is
/// deliberately not consulted.
fn decode_text(part: &ParsedMail<'_>) -> Result<String, ParseError> {
    let bytes = part
        .get_body_raw()
        .map_err(|e| ParseError::Mime(e.to_string()))?;
    let encoding = declared_charset(part).map_or_else(
        || sniff_encoding(&bytes),
        |label| Encoding::for_label(label.trim().as_bytes()).unwrap_or(WINDOWS_1252),
    );
    let (text, _, _) = encoding.decode(&bytes);
    Ok(text.replace("\r\n", "\n").trim_end_matches('\n').to_owned())
}

fn sniff_encoding(bytes: &[u8]) -> &'static Encoding {
    if let Some((encoding, _)) = Encoding::for_bom(bytes) {
        return encoding;
    }
    if bytes.is_ascii() {
        return UTF_8;
    }
    let mut detector = EncodingDetector::new();
    detector.feed(bytes, true);
    detector.guess(None, true)
}

fn declared_charset(part: &ParsedMail<'_>) -> Option<String> {
    let value = raw_header(part, "Content-Type")?;
    header_params(&value)
        .into_iter()
        .find(|(key, _)| key.eq_ignore_ascii_case("charset"))
        .map(|(_, value)| value)
}

fn raw_header(part: &ParsedMail<'_>, name: &str) -> Option<String> {
    part.headers
        .iter()
        .find(|header| header.get_key_ref().eq_ignore_ascii_case(name))
        .map(|header| String::from_utf8_lossy(header.get_value_raw()).into_owned())
}

// Splits a structured header value into its parameters, honoring quoted
// strings. The leading type token is skipped.
fn header_params(value: &str) -> Vec<(String, String)> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    for c in value.chars() {
        match c {
            '"' => quoted = !quoted,
            ';' if !quoted => {
                segments.push(std::mem::take(&mut current));
                continue;
            }
            _ => {}
        }
        current.push(c);
    }
    segments.push(current);

    segments
        .into_iter()
        .skip(1)
        .filter_map(|segment| {
            let (key, value) = segment.split_once('=')?;
            let value = value.trim().trim_matches('"').replace("\\\"", "\"");
            Some((key.trim().to_owned(), value))
        })
        .collect()
}

// Filename resolution order: RFC 2231 (continuations and charset), then
// RFC 2047 encoded words, then the raw parameter.
fn resolve_filename(part: &ParsedMail<'_>) -> Option<String> {
    let cd_params = raw_header(part, "Content-Disposition")
        .map(|value| header_params(&value))
        .unwrap_or_default();
    let ct_params = raw_header(part, "Content-Type")
        .map(|value| header_params(&value))
        .unwrap_or_default();

    assemble_rfc2231(&cd_params, "filename")
        .or_else(|| plain_param(&cd_params, "filename"))
        .or_else(|| assemble_rfc2231(&ct_params, "name"))
        .or_else(|| plain_param(&ct_params, "name"))
        .filter(|name| !name.is_empty())
}

fn plain_param(params: &[(String, String)], name: &str) -> Option<String> {
    params
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| decode_rfc2047(value))
}

fn assemble_rfc2231(params: &[(String, String)], base: &str) -> Option<String> {
    let prefix = format!("{base}*");
    let mut segments: Vec<(u32, bool, &str)> = Vec::new();
    for (key, value) in params {
        let key = key.to_ascii_lowercase();
        let Some(rest) = key.strip_prefix(&prefix) else {
            continue;
        };
        if rest.is_empty() {
            segments.push((0, true, value));
        } else {
            let (number, extended) = rest
                .strip_suffix('*')
                .map_or((rest, false), |number| (number, true));
            if let Ok(number) = number.parse::<u32>() {
                segments.push((number, extended, value));
            }
        }
    }
    if segments.is_empty() {
        return None;
    }
    segments.sort_by_key(|segment| segment.0);

    let mut charset: Option<String> = None;
    let mut bytes = Vec::new();
    for (idx, (_, extended, value)) in segments.iter().enumerate() {
        if *extended {
            let mut value = *value;
            if idx == 0 {
                let mut split = value.splitn(3, '\'');
                if let (Some(label), Some(_lang), Some(rest)) =
                    (split.next(), split.next(), split.next())
                {
                    charset = Some(label.to_owned());
                    value = rest;
                }
            }
            bytes.extend(percent_decode(value));
        } else {
            bytes.extend_from_slice(value.as_bytes());
        }
    }
    let encoding = charset
        .as_deref()
        .and_then(|label| Encoding::for_label(label.trim().as_bytes()))
        .unwrap_or(UTF_8);
    Some(encoding.decode(&bytes).0.into_owned())
}

fn percent_decode(value: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(value.len());
    let bytes = value.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            if let (Some(hi), Some(lo)) = (
                bytes.get(i + 1).and_then(|b| (*b as char).to_digit(16)),
                bytes.get(i + 2).and_then(|b| (*b as char).to_digit(16)),
            ) {
                out.push(u8::try_from(hi * 16 + lo).unwrap_or_default());
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    out
}

fn decode_rfc2047(input: &str) -> String {
    if !input.contains("=?") {
        return input.to_owned();
    }
    let mut out = String::new();
    let mut rest = input;
    while let Some(start) = rest.find("=?") {
        out.push_str(&rest[..start]);
        let token = &rest[start..];
        let Some(end) = token[2..].find("?=").map(|pos| pos + 4) else {
            out.push_str(token);
            return out;
        };
        let word = &token[..end];
        out.push_str(&decode_encoded_word(word).unwrap_or_else(|| word.to_owned()));
        rest = &token[end..];
    }
    out.push_str(rest);
    out
}

fn decode_encoded_word(word: &str) -> Option<String> {
    let inner = word.strip_prefix("=?")?.strip_suffix("?=")?;
    let mut split = inner.splitn(3, '?');
    let charset = split.next()?;
    let scheme = split.next()?;
    let data = split.next()?;

    let bytes = match scheme {
        "b" | "B" => BASE64.decode(data.as_bytes()).ok()?,
        "q" | "Q" => quoted_printable::decode(
            data.replace('_', " ").as_bytes(),
            quoted_printable::ParseMode::Robust,
        )
        .ok()?,
        _ => return None,
    };
    let encoding = Encoding::for_label(charset.trim().as_bytes()).unwrap_or(UTF_8);
    Some(encoding.decode(&bytes).0.into_owned())
}

fn html_to_text(html: &str) -> String {
    let mut text = String::with_capacity(html.len() / 2);
    let mut rest = html;
    while let Some(open) = rest.find('<') {
        text.push_str(&rest[..open]);
        rest = &rest[open..];
        let Some(close) = rest.find('>') else {
            rest = "";
            break;
        };
        let tag_body = &rest[1..close];
        let closing = tag_body.starts_with('/');
        let tag: String = tag_body
            .trim_start_matches('/')
            .chars()
            .take_while(char::is_ascii_alphanumeric)
            .collect::<String>()
            .to_ascii_lowercase();
        rest = &rest[close + 1..];
        match tag.as_str() {
            "br" => text.push('\n'),
            "p" | "div" | "li" | "tr" | "h1" | "h2" | "h3" | "h4" | "h5" | "h6" if closing => {
                text.push('\n');
            }
            "style" | "script" if !closing => {
                let needle = format!("</{tag}");
                if let Some(pos) = rest.to_ascii_lowercase().find(&needle) {
                    rest = &rest[pos..];
                    match rest.find('>') {
                        Some(end) => rest = &rest[end + 1..],
                        None => rest = "",
                    }
                } else {
                    rest = "";
                }
            }
            _ => {}
        }
    }
    text.push_str(rest);
    collapse(&decode_entities(&text))
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

fn collapse(text: &str) -> String {
    let mut lines: Vec<String> = Vec::new();
    for line in text.lines() {
        let mut collapsed = String::new();
        let mut last_space = true;
        for c in line.chars() {
            if c.is_whitespace() {
                if !last_space {
                    collapsed.push(' ');
                }
                last_space = true;
            } else {
                collapsed.push(c);
                last_space = false;
            }
        }
        let collapsed = collapsed.trim_end().to_owned();
        if collapsed.is_empty() && lines.last().map_or(true, String::is_empty) {
            continue;
        }
        lines.push(collapsed);
    }
    while lines.last().is_some_and(String::is_empty) {
        lines.pop();
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: &[u8]) -> Message {
        Message::parse(raw).expect("parse")
    }

    #[test]
    fn text_plain() {
        let m = parse(
            b"From: \"Sender\" <sender@svc.test>\r\n\
              To: \"Receiver\" <receiver@svc.test>\r\n\
              Subject: hi\r\n\
              \r\n\
              body",
        );
        let sender = m.sender.as_ref().expect("sender");
        assert_eq!(sender.name, "Sender");
        assert_eq!(sender.address, "sender@svc.test");
        assert_eq!(m.to_list[0].address, "receiver@svc.test");
        assert_eq!(m.subject, "hi");
        assert_eq!(m.rich_body, "body");
        assert_eq!(m.plain_body, "body");
        assert_eq!(m.mime_type, MimeType::TextPlain);
        assert!(m.attachments.is_empty());
    }

    #[test]
    fn text_plain_latin1() {
        let m = parse(
            b"From: <sender@svc.test>\r\n\
              Content-Type: text/plain; charset=iso-8859-1\r\n\
              \r\n\
              \xe9\xe9\xe9\xe9\xe9\xe9\xe9",
        );
        assert_eq!(m.rich_body, "\u{e9}\u{e9}\u{e9}\u{e9}\u{e9}\u{e9}\u{e9}");
    }

    #[test]
    fn unknown_charset_is_read_as_latin1() {
        let m = parse(
            b"From: <sender@svc.test>\r\n\
              Content-Type: text/plain; charset=x-unknown-charset\r\n\
              \r\n\
              caf\xe9",
        );
        assert_eq!(m.rich_body, "caf\u{e9}");
    }

    #[test]
    fn missing_charset_is_sniffed() {
        // UTF-8 BOM wins over statistics.
        let m = parse(
            b"From: <sender@svc.test>\r\n\
              Content-Type: text/plain\r\n\
              \r\n\
              \xef\xbb\xbfbonjour caf\xc3\xa9",
        );
        assert_eq!(m.rich_body, "bonjour caf\u{e9}");

        // No BOM, 8-bit bytes: statistical guess lands on a latin codepage.
        let m = parse(
            b"From: <sender@svc.test>\r\n\
              Content-Type: text/plain\r\n\
              \r\n\
              un petit caf\xe9 pour la route, merci beaucoup monsieur",
        );
        assert_eq!(
            m.rich_body,
            "un petit caf\u{e9} pour la route, merci beaucoup monsieur"
        );
    }

    #[test]
    fn alternative_prefers_html() {
        let m = parse(
            b"From: <sender@svc.test>\r\n\
              Content-Type: multipart/alternative; boundary=\"b1\"\r\n\
              \r\n\
              --b1\r\n\
              Content-Type: text/plain\r\n\
              \r\n\
              plain body\r\n\
              --b1\r\n\
              Content-Type: text/html\r\n\
              \r\n\
              <b>rich body</b>\r\n\
              --b1--\r\n",
        );
        assert_eq!(m.rich_body, "<b>rich body</b>");
        assert_eq!(m.plain_body, "plain body");
        assert!(m.is_html());
        assert_eq!(m.mime_type, MimeType::TextHtml);
    }

    #[test]
    fn octet_attachment() {
        let m = parse(
            b"From: <sender@svc.test>\r\n\
              Content-Type: multipart/mixed; boundary=\"b1\"\r\n\
              \r\n\
              --b1\r\n\
              Content-Type: text/plain\r\n\
              \r\n\
              body\r\n\
              --b1\r\n\
              Content-Type: application/octet-stream\r\n\
              Content-Disposition: attachment; filename=\"data.bin\"\r\n\
              Content-Transfer-Encoding: base64\r\n\
              \r\n\
              aWYgeW91IGFyZSByZWFkaW5nIHRoaXMsIGhpIQ==\r\n\
              --b1--\r\n",
        );
        assert_eq!(m.rich_body, "body");
        assert_eq!(m.mime_type, MimeType::MultipartMixed);
        assert_eq!(m.attachments.len(), 1);
        let att = &m.attachments[0];
        assert_eq!(att.name, "data.bin");
        assert_eq!(att.mime_type, "application/octet-stream");
        assert_eq!(att.disposition, Disposition::Attachment);
        assert_eq!(att.data, b"if you are reading this, hi!");
    }

    #[test]
    fn rfc2231_filename() {
        let m = parse(
            b"From: <sender@svc.test>\r\n\
              Content-Type: multipart/mixed; boundary=\"b1\"\r\n\
              \r\n\
              --b1\r\n\
              Content-Type: text/plain\r\n\
              \r\n\
              body\r\n\
              --b1\r\n\
              Content-Type: application/octet-stream\r\n\
              Content-Disposition: attachment; filename*=utf-8''%F0%9F%98%81.txt\r\n\
              \r\n\
              x\r\n\
              --b1--\r\n",
        );
        assert_eq!(m.attachments[0].name, "\u{1f601}.txt");
    }

    #[test]
    fn rfc2231_continuation_filename() {
        let m = parse(
            b"From: <sender@svc.test>\r\n\
              Content-Type: multipart/mixed; boundary=\"b1\"\r\n\
              \r\n\
              --b1\r\n\
              Content-Type: text/plain\r\n\
              \r\n\
              body\r\n\
              --b1\r\n\
              Content-Type: application/octet-stream\r\n\
              Content-Disposition: attachment; filename*0*=utf-8''hello%20; filename*1*=world.txt\r\n\
              \r\n\
              x\r\n\
              --b1--\r\n",
        );
        assert_eq!(m.attachments[0].name, "hello world.txt");
    }

    #[test]
    fn rfc2047_filename() {
        let m = parse(
            b"From: <sender@svc.test>\r\n\
              Content-Type: multipart/mixed; boundary=\"b1\"\r\n\
              \r\n\
              --b1\r\n\
              Content-Type: text/plain\r\n\
              \r\n\
              body\r\n\
              --b1\r\n\
              Content-Type: application/octet-stream\r\n\
              Content-Disposition: attachment; filename=\"=?utf-8?B?8J+YgS50eHQ=?=\"\r\n\
              \r\n\
              x\r\n\
              --b1--\r\n",
        );
        assert_eq!(m.attachments[0].name, "\u{1f601}.txt");
    }

    #[test]
    fn missing_filename_is_synthesized() {
        let m = parse(
            b"From: <sender@svc.test>\r\n\
              Content-Type: multipart/mixed; boundary=\"b1\"\r\n\
              \r\n\
              --b1\r\n\
              Content-Type: text/plain\r\n\
              \r\n\
              body\r\n\
              --b1\r\n\
              Content-Type: application/octet-stream\r\n\
              Content-Disposition: attachment\r\n\
              \r\n\
              x\r\n\
              --b1--\r\n",
        );
        assert_eq!(m.attachments[0].name, "attachment.bin");
    }

    #[test]
    fn inline_image_keyed_by_content_id() {
        let m = parse(
            b"From: <sender@svc.test>\r\n\
              Content-Type: multipart/related; boundary=\"b1\"\r\n\
              \r\n\
              --b1\r\n\
              Content-Type: text/html\r\n\
              \r\n\
              <img src=\"cid:img1@local\">\r\n\
              --b1\r\n\
              Content-Type: image/png; name=\"pixel.png\"\r\n\
              Content-ID: <img1@local>\r\n\
              \r\n\
              PNG\r\n\
              --b1--\r\n",
        );
        assert_eq!(m.attachments.len(), 1);
        let att = &m.attachments[0];
        assert_eq!(att.disposition, Disposition::Inline);
        assert_eq!(att.content_id.as_deref(), Some("img1@local"));
        assert_eq!(att.name, "pixel.png");
    }

    #[test]
    fn html_without_alternative_derives_text_projection() {
        let m = parse(
            b"From: <sender@svc.test>\r\n\
              Content-Type: text/html\r\n\
              \r\n\
              <html><body><p>Hello<br>World</p></body></html>",
        );
        assert!(m.is_html());
        assert_eq!(m.plain_body, "Hello\nWorld");
    }

    #[test]
    fn references_and_external_id() {
        let m = parse(
            b"From: <sender@svc.test>\r\n\
              Message-ID: <mine@client.test>\r\n\
              References: <abc@pelican.internalid> <xyz@example.com>\r\n\
              \r\n\
              body",
        );
        assert_eq!(m.external_id.as_deref(), Some("mine@client.test"));
        assert_eq!(m.references, vec!["abc@pelican.internalid", "xyz@example.com"]);
    }

    #[test]
    fn leading_garbage_is_repaired() {
        let m = parse(
            b"\r\n\
              not a header line\r\n\
              From: <sender@svc.test>\r\n\
              Subject: ok\r\n\
              \r\n\
              body",
        );
        assert_eq!(m.subject, "ok");
        assert_eq!(m.rich_body, "body");
    }

    #[test]
    fn parser_is_a_fixed_point_on_its_own_output() {
        let m = parse(
            b"From: \"Sender\" <sender@svc.test>\r\n\
              To: <receiver@svc.test>\r\n\
              Subject: =?utf-8?B?c3ViamVjdCDDqQ==?=\r\n\
              Message-ID: <mine@client.test>\r\n\
              Content-Type: multipart/mixed; boundary=\"b1\"\r\n\
              \r\n\
              --b1\r\n\
              Content-Type: multipart/alternative; boundary=\"b2\"\r\n\
              \r\n\
              --b2\r\n\
              Content-Type: text/plain\r\n\
              \r\n\
              plain\r\n\
              --b2\r\n\
              Content-Type: text/html\r\n\
              \r\n\
              <b>rich</b>\r\n\
              --b2--\r\n\
              --b1\r\n\
              Content-Type: application/octet-stream\r\n\
              Content-Disposition: attachment; filename=\"data.bin\"\r\n\
              Content-Transfer-Encoding: base64\r\n\
              \r\n\
              aGVsbG8=\r\n\
              --b1--\r\n",
        );
        assert_eq!(m.subject, "subject \u{e9}");

        let again = parse(m.mime_body.as_bytes());
        assert_eq!(again.sender, m.sender);
        assert_eq!(again.to_list, m.to_list);
        assert_eq!(again.subject, m.subject);
        assert_eq!(again.external_id, m.external_id);
        assert_eq!(again.mime_type, m.mime_type);
        assert_eq!(again.rich_body, m.rich_body);
        assert_eq!(again.plain_body, m.plain_body);
        assert_eq!(again.attachments, m.attachments);
        assert_eq!(again.mime_body, m.mime_body);
    }
}
