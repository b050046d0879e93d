// SPDX-FileCopyrightText: 2024 The pelican developers
//
// SPDX-License-Identifier: Apache-2.0

//! Local accounts served by the gateway.
//!
//! Users are declared in the config file; their keyrings are generated at
//! startup. A session takes an immutable snapshot of this state at AUTH
//! time; changes require tearing the session down.

use std::{collections::HashMap, sync::Arc};

use pelican_deps::{
    argon2::{
        password_hash::{rand_core::OsRng, SaltString},
        Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    },
    secrecy::{ExposeSecret, SecretString},
    serde::{self, Deserialize, Serialize},
    tracing::{self, debug, instrument},
};

use crate::{
    api::MailSettings,
    config::{Config, UserConfig},
    crypto::KeyRing,
    safe::SafeMap,
};

/// Whether all owned addresses share one SMTP surface or each address gets
/// its own, requiring address-scoped filtering upstream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(crate = "self::serde", rename_all = "lowercase")]
pub enum AddressMode {
    /// All addresses share one surface.
    #[default]
    Combined,
    /// Each address is a separate surface.
    Split,
}

/// The type of an owned address.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(crate = "self::serde", rename_all = "lowercase")]
pub enum AddressType {
    /// The account's main address.
    #[default]
    Primary,
    /// An additional owned address.
    Alias,
    /// An externally hosted address.
    External,
    /// An address the user can no longer send from.
    Disabled,
}

/// One owned address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    /// The upstream address id.
    pub id: String,
    /// The address in canonical casing.
    pub email: String,
    /// The address type.
    pub addr_type: AddressType,
    /// Whether the address receives mail.
    pub receives: bool,
    /// Display order.
    pub order: i32,
}

/// One local account with its generated keyrings.
pub struct GatewayUser {
    /// The upstream user id.
    pub user_id: String,
    /// The SMTP AUTH login name.
    pub username: String,
    password_hash: String,
    /// The account's address mode.
    pub address_mode: AddressMode,
    /// Owned addresses, ordered by their `order` field.
    pub addresses: Vec<Address>,
    /// The user's mail settings.
    pub settings: MailSettings,
    /// The user's master keyring.
    pub user_kr: Arc<KeyRing>,
    /// Per-address keyrings, by address id.
    pub addr_krs: Arc<SafeMap<Arc<KeyRing>>>,
}

impl std::fmt::Debug for GatewayUser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayUser")
            .field("user_id", &self.user_id)
            .field("username", &self.username)
            .field("addresses", &self.addresses.len())
            .finish_non_exhaustive()
    }
}

impl GatewayUser {
    fn from_config(config: &UserConfig) -> Self {
        let mut addresses: Vec<Address> = config
            .addresses
            .iter()
            .map(|addr| Address {
                id: addr.id.clone(),
                email: addr.email.clone(),
                addr_type: addr.addr_type,
                receives: addr.receives,
                order: addr.order,
            })
            .collect();
        addresses.sort_by_key(|addr| addr.order);

        let addr_krs = SafeMap::new();
        for addr in &addresses {
            addr_krs.set(&addr.id, Arc::new(KeyRing::generate(&addr.email)));
        }

        Self {
            user_id: config.user_id.clone(),
            username: config.username.clone(),
            password_hash: config.password_hash.clone(),
            address_mode: config.address_mode,
            addresses,
            settings: config.settings,
            user_kr: Arc::new(KeyRing::generate(&config.username)),
            addr_krs: Arc::new(addr_krs),
        }
    }

    /// Checks the gateway password against the stored argon2 hash.
    #[must_use]
    pub fn verify_password(&self, password: &SecretString) -> bool {
        let Ok(hash) = PasswordHash::new(&self.password_hash) else {
            return false;
        };
        Argon2::default()
            .verify_password(password.expose_secret().as_bytes(), &hash)
            .is_ok()
    }

    /// All sendable addresses by id, in canonical casing.
    #[must_use]
    pub fn emails(&self) -> HashMap<String, String> {
        self.addresses
            .iter()
            .filter(|addr| addr.addr_type != AddressType::Disabled)
            .map(|addr| (addr.id.clone(), addr.email.clone()))
            .collect()
    }

    /// The primary address, falling back to the lowest-ordered one.
    #[must_use]
    pub fn primary_address(&self) -> Option<&Address> {
        self.addresses
            .iter()
            .find(|addr| addr.addr_type == AddressType::Primary)
            .or_else(|| self.addresses.first())
    }

    /// Finds an owned address by case-insensitive email match.
    #[must_use]
    pub fn address_by_email(&self, email: &str) -> Option<&Address> {
        self.addresses
            .iter()
            .find(|addr| addr.email.eq_ignore_ascii_case(email))
    }
}

/// The registry of local accounts, shared by all connections.
pub struct Accounts {
    users: SafeMap<Arc<GatewayUser>>,
}

impl Accounts {
    /// Builds the registry from the config, generating all keyrings.
    #[instrument(skip(config))]
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        let users = SafeMap::new();
        for user in &config.users {
            debug!("Generating keyrings for {}", user.username);
            users.set(&user.username, Arc::new(GatewayUser::from_config(user)));
        }
        Self { users }
    }

    /// Looks a user up by login name or by any owned address email.
    #[must_use]
    pub fn lookup(&self, username: &str) -> Option<Arc<GatewayUser>> {
        if let Some(user) = self.users.get(username, Arc::clone) {
            return Some(user);
        }
        let mut found = None;
        self.users.for_each(|_, user| {
            if found.is_none() && user.address_by_email(username).is_some() {
                found = Some(Arc::clone(user));
            }
        });
        found
    }

    /// Verifies credentials, returning the user on success.
    #[must_use]
    pub fn verify(&self, username: &str, password: &SecretString) -> Option<Arc<GatewayUser>> {
        let user = self.lookup(username)?;
        user.verify_password(password).then_some(user)
    }

    /// Number of configured accounts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.users.len()
    }

    /// Whether no account is configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

/// Hashes a gateway password for the config file.
pub fn hash_password(password: &str) -> Result<String, pelican_deps::argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    Ok(Argon2::default()
        .hash_password(password.as_bytes(), &salt)?
        .to_string())
}
