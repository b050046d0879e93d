// SPDX-FileCopyrightText: 2024 The pelican developers
//
// SPDX-License-Identifier: Apache-2.0

//! The send pipeline error taxonomy and its mapping to SMTP replies.
//!
//! Validation and protocol errors map to permanent 5xx replies; directory
//! and crypto errors carrying the transient bit map to 4xx so the client
//! retries. Nothing is retried inside the pipeline itself.

use pelican_core::{api::ApiError, crypto::CryptoError, message::ParseError};
use thiserror::Error;

/// Everything that can go wrong between `MAIL FROM` and the final reply.
#[derive(Error, Debug)]
pub enum SendError {
    /// The return path does not match an owned address.
    #[error("invalid return path")]
    InvalidReturnPath,
    /// An empty or missing recipient.
    #[error("invalid recipient")]
    InvalidRecipient,
    /// The message names a sender the user does not own.
    #[error("address {0:?} is not owned by the user")]
    AddressNotOwned(String),
    /// No keyring is registered for the sending address.
    #[error("no keyring for the sending address")]
    MissingAddrKey,
    /// The sending address keyring holds no usable key.
    #[error("no usable key for address {0}")]
    KeyUnusable(String),
    /// An SMTP option the gateway refuses.
    #[error("command parameter not implemented")]
    NotImplemented,
    /// An encrypting scheme was resolved but no public key is available.
    #[error("recipient {0} has no usable public key")]
    MissingRecipientKey(String),
    /// A non-pinned contact key is not advertised by the directory.
    #[error("contact key for {0} is not advertised by the directory")]
    KeyMismatch(String),
    /// An upstream directory call failed.
    #[error(transparent)]
    Api(#[from] ApiError),
    /// A keyring or packet operation failed.
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    /// The submitted byte stream was not a parseable message.
    #[error(transparent)]
    Parse(#[from] ParseError),
    /// The surrounding DATA scope was canceled.
    #[error("send canceled")]
    Canceled,
}

impl SendError {
    /// The SMTP reply line for this error.
    #[must_use]
    pub fn reply(&self) -> String {
        match self {
            Self::InvalidReturnPath => String::from("501 5.1.7 Invalid return path"),
            Self::InvalidRecipient => String::from("501 5.1.3 Invalid recipient"),
            Self::AddressNotOwned(_) => {
                String::from("550 5.7.1 Sending address is not owned by the user")
            }
            Self::MissingAddrKey => {
                String::from("451 4.7.0 Address key unavailable, try again later")
            }
            Self::KeyUnusable(_) => {
                String::from("550 5.7.0 No usable key for the sending address")
            }
            Self::NotImplemented => String::from("502 5.5.1 Command parameter not implemented"),
            Self::MissingRecipientKey(_) => {
                String::from("550 5.7.10 Recipient has no usable public key")
            }
            Self::KeyMismatch(_) => {
                String::from("550 5.7.0 Contact key is not advertised by the recipient")
            }
            Self::Api(e) if e.is_transient() => {
                String::from("451 4.4.1 Upstream service unavailable, try again later")
            }
            Self::Api(_) => String::from("554 5.0.0 Upstream service rejected the message"),
            Self::Crypto(_) => String::from("550 5.7.0 Cryptography failure"),
            Self::Parse(_) => String::from("554 5.6.0 Message could not be parsed"),
            Self::Canceled => String::from("451 4.3.0 Send aborted"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_codes() {
        assert!(SendError::InvalidReturnPath.reply().starts_with("501 5.1.7"));
        assert!(SendError::InvalidRecipient.reply().starts_with("501 5.1.3"));
        assert!(SendError::AddressNotOwned(String::from("x@y")).reply().starts_with("550 5.7.1"));
        assert!(SendError::MissingAddrKey.reply().starts_with("451 4.7.0"));
        assert!(SendError::NotImplemented.reply().starts_with("502 5.5.1"));
        assert!(SendError::Api(ApiError::Status(500)).reply().starts_with("451 4.4.1"));
        assert!(SendError::Api(ApiError::Status(422)).reply().starts_with("554"));
    }
}
