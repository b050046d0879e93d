// SPDX-FileCopyrightText: 2024 The pelican developers
//
// SPDX-License-Identifier: Apache-2.0

use pelican_deps::{
    color_eyre,
    serde::{self, Deserialize, Serialize},
    serde_yaml, tokio,
};

use crate::accounts::AddressMode;

const fn default_port() -> u16 {
    1025
}

const fn default_max_message_size() -> u64 {
    26_214_400
}

const fn default_api_timeout() -> u64 {
    30
}

/// The config for the gateway
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(crate = "self::serde")]
pub struct Config {
    /// Configurations specific to the mail concept itself
    pub mail: Mail,
    /// IPs the server should listen on instead of loopback only
    pub listen_ips: Option<Vec<String>>,
    /// Port of the SMTP submission surface
    #[serde(default = "default_port")]
    pub port: u16,
    /// The upstream directory API
    pub api: Api,
    /// The local accounts served by the gateway
    pub users: Vec<UserConfig>,
}

/// Configurations specific to the mail concept itself
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(crate = "self::serde")]
pub struct Mail {
    /// Hostname the SMTP server lives at.
    pub hostname: String,
    /// Maximum accepted message size in bytes, advertised via SIZE
    #[serde(default = "default_max_message_size")]
    pub max_message_size: u64,
}

/// The config of the upstream directory API client
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(crate = "self::serde")]
pub struct Api {
    /// Base URL of the directory API
    pub base_url: String,
    /// Bearer token used for all requests
    pub token: String,
    /// Request timeout in seconds
    #[serde(default = "default_api_timeout")]
    pub timeout_secs: u64,
}

/// One local account
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(crate = "self::serde")]
pub struct UserConfig {
    /// Login name presented over SMTP AUTH
    pub username: String,
    /// The user's upstream id
    pub user_id: String,
    /// Argon2 hash of the gateway password
    pub password_hash: String,
    /// Whether all addresses share one surface or each gets its own
    #[serde(default)]
    pub address_mode: AddressMode,
    /// The addresses owned by the user
    pub addresses: Vec<AddressConfig>,
    /// The user's mail settings
    #[serde(default)]
    pub settings: crate::api::MailSettings,
}

/// One owned address of an account
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(crate = "self::serde")]
pub struct AddressConfig {
    /// The upstream address id
    pub id: String,
    /// The email address in canonical casing
    pub email: String,
    /// The address type
    #[serde(default)]
    pub addr_type: crate::accounts::AddressType,
    /// Whether the address receives mail
    #[serde(default = "crate::config::default_receives")]
    pub receives: bool,
    /// Display order of the address
    #[serde(default)]
    pub order: i32,
}

pub(crate) const fn default_receives() -> bool {
    true
}

impl Config {
    /// Loads the config file to the struct
    ///
    /// # Errors
    ///
    /// Does return io errors if something goes wrong
    pub async fn load<P: AsRef<std::path::Path> + std::fmt::Debug>(
        path: P,
    ) -> color_eyre::eyre::Result<Self> {
        let contents = tokio::fs::read_to_string(path).await?;
        let config: Self = serde_yaml::from_str(&contents)?;
        Ok(config)
    }
}
