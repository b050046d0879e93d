// SPDX-FileCopyrightText: 2024 The pelican developers
//
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use pelican_deps::{
    async_trait::async_trait,
    reqwest::{
        self,
        header::{HeaderMap, HeaderValue, AUTHORIZATION},
    },
    secrecy::{ExposeSecret, SecretString},
    serde::{self, Deserialize},
    tracing::{self, debug, instrument},
};

use crate::{
    api::{
        ApiError, AttachmentMeta, Contact, ContactEmail, CreateAttachmentReq, CreateDraftReq,
        DirectoryClient, DraftMessage, Filter, MessageMetadata, RecipientType, SendReq,
        SentMessage,
    },
    config,
    crypto::PublicKey,
};

/// The reqwest-backed directory client.
#[derive(Debug, Clone)]
pub struct HttpDirectory {
    http: reqwest::Client,
    base_url: String,
}

impl HttpDirectory {
    /// Builds a client against the configured base URL, authenticating every
    /// request with the configured bearer token.
    pub fn new(config: &config::Api) -> Result<Self, ApiError> {
        let token = SecretString::new(config.token.clone());
        let mut headers = HeaderMap::new();
        let mut auth = HeaderValue::from_str(&format!("Bearer {}", token.expose_secret()))
            .map_err(|_| ApiError::Decode("invalid api token".into()))?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent("pelican")
            .default_headers(headers)
            .build()?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_owned(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

async fn decode<T: for<'de> Deserialize<'de>>(
    response: reqwest::Response,
) -> Result<T, ApiError> {
    let status = response.status();
    if !status.is_success() {
        return Err(ApiError::Status(status.as_u16()));
    }
    Ok(response.json::<T>().await?)
}

#[derive(Debug, Deserialize)]
#[serde(crate = "self::serde", rename_all = "PascalCase")]
struct PublicKeyEntry {
    public_key: String,
}

#[derive(Debug, Deserialize)]
#[serde(crate = "self::serde", rename_all = "PascalCase")]
struct PublicKeysResponse {
    keys: Vec<PublicKeyEntry>,
    recipient_type: RecipientType,
}

#[async_trait]
impl DirectoryClient for HttpDirectory {
    #[instrument(skip(self))]
    async fn get_all_message_metadata(
        &self,
        filter: &Filter,
    ) -> Result<Vec<MessageMetadata>, ApiError> {
        let query: Vec<(&str, &str)> = filter
            .iter()
            .flat_map(|(key, values)| values.iter().map(move |value| (key.as_str(), value.as_str())))
            .collect();
        let response = self
            .http
            .get(self.url("/mail/v1/messages/metadata"))
            .query(&query)
            .send()
            .await?;
        decode(response).await
    }

    #[instrument(skip(self))]
    async fn get_public_keys(
        &self,
        email: &str,
    ) -> Result<(Vec<PublicKey>, RecipientType), ApiError> {
        let response = self
            .http
            .get(self.url("/mail/v1/keys"))
            .query(&[("Email", email)])
            .send()
            .await?;
        let body: PublicKeysResponse = decode(response).await?;
        debug!("Directory advertises {} key(s) for {email}", body.keys.len());

        let keys = body
            .keys
            .iter()
            .map(|entry| PublicKey::from_armored(&entry.public_key))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| ApiError::Decode(format!("bad public key: {e}")))?;
        Ok((keys, body.recipient_type))
    }

    #[instrument(skip(self))]
    async fn get_all_contact_emails(&self, email: &str) -> Result<Vec<ContactEmail>, ApiError> {
        let response = self
            .http
            .get(self.url("/contacts/v1/emails"))
            .query(&[("Email", email)])
            .send()
            .await?;
        decode(response).await
    }

    #[instrument(skip(self))]
    async fn get_contact(&self, id: &str) -> Result<Contact, ApiError> {
        let response = self
            .http
            .get(self.url(&format!("/contacts/v1/{id}")))
            .send()
            .await?;
        decode(response).await
    }

    #[instrument(skip(self, req))]
    async fn create_draft(&self, req: CreateDraftReq) -> Result<DraftMessage, ApiError> {
        let response = self
            .http
            .post(self.url("/mail/v1/messages"))
            .json(&req)
            .send()
            .await?;
        decode(response).await
    }

    #[instrument(skip(self, req))]
    async fn upload_attachment(
        &self,
        req: CreateAttachmentReq,
    ) -> Result<AttachmentMeta, ApiError> {
        let response = self
            .http
            .post(self.url("/mail/v1/attachments"))
            .json(&req)
            .send()
            .await?;
        decode(response).await
    }

    #[instrument(skip(self, req))]
    async fn send_draft(&self, draft_id: &str, req: SendReq) -> Result<SentMessage, ApiError> {
        let response = self
            .http
            .post(self.url(&format!("/mail/v1/messages/{draft_id}/send")))
            .json(&req)
            .send()
            .await?;
        decode(response).await
    }

    #[instrument(skip(self))]
    async fn delete_message(&self, id: &str) -> Result<(), ApiError> {
        let response = self
            .http
            .delete(self.url(&format!("/mail/v1/messages/{id}")))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Status(status.as_u16()));
        }
        Ok(())
    }
}
