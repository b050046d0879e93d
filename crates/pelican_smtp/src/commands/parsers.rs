// SPDX-FileCopyrightText: 2024 The pelican developers
//
// SPDX-License-Identifier: Apache-2.0

use pelican_deps::{
    nom::{
        bytes::complete::take_while,
        character::complete::char,
        error::{context, VerboseError},
        sequence::delimited,
        IResult,
    },
    tracing::{self, instrument},
};

use crate::session::MailOptions;

type Res<'a, U> = IResult<&'a str, U, VerboseError<&'a str>>;

/// Parses the `<addr>` argument of `MAIL FROM`/`RCPT TO`. The address may
/// be empty (`<>`).
#[instrument(skip(input))]
pub fn address_argument(input: &str) -> Res<&str> {
    context(
        "address_argument",
        delimited(char('<'), take_while(|c: char| c != '>'), char('>')),
    )(input)
}

/// Collects the ESMTP parameters following the address argument.
#[must_use]
pub fn mail_options(args: &[&str]) -> MailOptions {
    let mut opts = MailOptions::default();
    for arg in args {
        let upper = arg.to_ascii_uppercase();
        if upper == "SMTPUTF8" {
            opts.utf8 = true;
        } else if upper == "REQUIRETLS" {
            opts.require_tls = true;
        } else if let Some(size) = upper.strip_prefix("SIZE=") {
            opts.size = size.parse().ok();
        } else if let Some(body) = upper.strip_prefix("BODY=") {
            opts.body = Some(body.to_owned());
        } else if let Some(auth) = arg
            .strip_prefix("AUTH=")
            .or_else(|| arg.strip_prefix("auth="))
        {
            opts.auth = Some(
                auth.trim_start_matches('<')
                    .trim_end_matches('>')
                    .to_owned(),
            );
        }
    }
    opts
}
