// SPDX-FileCopyrightText: 2024 The pelican developers
//
// SPDX-License-Identifier: Apache-2.0

//! Keyrings and packet encryption for the send pipeline.
//!
//! Payloads are encrypted under a fresh symmetric session key (AES-256-GCM);
//! the session key itself is sealed per recipient into a key packet via
//! ECDH (secp256k1) and HKDF-SHA256. Signatures are detached Ed25519.

use pelican_deps::{
    aes_gcm::{
        aead::{Aead, KeyInit, Payload},
        Aes256Gcm, Nonce,
    },
    base64::{engine::general_purpose::STANDARD as BASE64, Engine as _},
    ed25519_dalek::{Signature, Signer, SigningKey, Verifier},
    hkdf::Hkdf,
    k256::{self, ecdh::EphemeralSecret, elliptic_curve::sec1::ToEncodedPoint, SecretKey},
    rand::{rngs::OsRng, RngCore},
    sha2::{Digest, Sha256},
};
use thiserror::Error;

const NONCE_LEN: usize = 12;
const SEC1_COMPRESSED_LEN: usize = 33;
const SIGNATURE_LEN: usize = 64;
const KEY_PACKET_INFO: &[u8] = b"pelican-key-packet";

/// Errors raised by keyring and packet operations.
#[derive(Error, Debug)]
pub enum CryptoError {
    /// Payload encryption failed.
    #[error("encryption failed")]
    Encrypt,
    /// Packet decryption failed (wrong key or corrupted packet).
    #[error("decryption failed")]
    Decrypt,
    /// The keyring holds no usable key.
    #[error("keyring holds no usable key")]
    MissingKey,
    /// Malformed key material.
    #[error("invalid key material")]
    InvalidKey,
    /// A signature did not verify.
    #[error("signature verification failed")]
    InvalidSignature,
    /// Armor framing was not recognized.
    #[error("invalid armor")]
    InvalidArmor,
}

/// A symmetric key freshly generated per message or per attachment.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionKey([u8; 32]);

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionKey(..)")
    }
}

impl SessionKey {
    /// Generates a fresh random session key.
    #[must_use]
    pub fn generate() -> Self {
        let mut key = [0u8; 32];
        OsRng.fill_bytes(&mut key);
        Self(key)
    }

    /// Reconstructs a session key from its raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let key: [u8; 32] = bytes.try_into().map_err(|_| CryptoError::InvalidKey)?;
        Ok(Self(key))
    }

    /// Encrypts `plaintext` into a data packet (`nonce || ciphertext`).
    /// `aad` is authenticated but not encrypted; attachments bind their
    /// filename here.
    pub fn encrypt(&self, plaintext: &[u8], aad: &str) -> Result<Vec<u8>, CryptoError> {
        let cipher = Aes256Gcm::new_from_slice(&self.0).map_err(|_| CryptoError::Encrypt)?;
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        let ciphertext = cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: plaintext,
                    aad: aad.as_bytes(),
                },
            )
            .map_err(|_| CryptoError::Encrypt)?;
        let mut packet = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        packet.extend_from_slice(&nonce);
        packet.extend_from_slice(&ciphertext);
        Ok(packet)
    }

    /// Decrypts a data packet produced by [`SessionKey::encrypt`].
    pub fn decrypt(&self, packet: &[u8], aad: &str) -> Result<Vec<u8>, CryptoError> {
        if packet.len() < NONCE_LEN {
            return Err(CryptoError::Decrypt);
        }
        let (nonce, ciphertext) = packet.split_at(NONCE_LEN);
        let cipher = Aes256Gcm::new_from_slice(&self.0).map_err(|_| CryptoError::Decrypt)?;
        cipher
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad: aad.as_bytes(),
                },
            )
            .map_err(|_| CryptoError::Decrypt)
    }

    /// Seals this session key to a recipient public key, producing a key
    /// packet (`ephemeral public key || nonce || wrapped key`).
    pub fn seal_to(&self, recipient: &PublicKey) -> Result<Vec<u8>, CryptoError> {
        let ephemeral = EphemeralSecret::random(&mut OsRng);
        let ephemeral_pub = ephemeral.public_key();
        let shared = ephemeral.diffie_hellman(&recipient.encryption);

        let wrap_key = derive_wrap_key(shared.raw_secret_bytes().as_slice())?;
        let cipher = Aes256Gcm::new_from_slice(&wrap_key).map_err(|_| CryptoError::Encrypt)?;
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        let wrapped = cipher
            .encrypt(Nonce::from_slice(&nonce), self.0.as_slice())
            .map_err(|_| CryptoError::Encrypt)?;

        let mut packet = Vec::with_capacity(SEC1_COMPRESSED_LEN + NONCE_LEN + wrapped.len());
        packet.extend_from_slice(ephemeral_pub.to_encoded_point(true).as_bytes());
        packet.extend_from_slice(&nonce);
        packet.extend_from_slice(&wrapped);
        Ok(packet)
    }
}

fn derive_wrap_key(shared: &[u8]) -> Result<[u8; 32], CryptoError> {
    let hk = Hkdf::<Sha256>::new(None, shared);
    let mut okm = [0u8; 32];
    hk.expand(KEY_PACKET_INFO, &mut okm)
        .map_err(|_| CryptoError::Encrypt)?;
    Ok(okm)
}

fn hex(bytes: &[u8]) -> String {
    use std::fmt::Write as _;
    bytes.iter().fold(String::new(), |mut out, b| {
        let _ = write!(out, "{b:02x}");
        out
    })
}

/// A recipient public key as advertised by the directory or pinned in a
/// contact.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublicKey {
    encryption: k256::PublicKey,
    fingerprint: String,
}

impl PublicKey {
    fn from_k256(encryption: k256::PublicKey) -> Self {
        let sec1 = encryption.to_encoded_point(true);
        let fingerprint = hex(&Sha256::digest(sec1.as_bytes()));
        Self {
            encryption,
            fingerprint,
        }
    }

    /// Parses a public key from raw SEC1 bytes.
    pub fn from_sec1_bytes(sec1: &[u8]) -> Result<Self, CryptoError> {
        let encryption =
            k256::PublicKey::from_sec1_bytes(sec1).map_err(|_| CryptoError::InvalidKey)?;
        Ok(Self::from_k256(encryption))
    }

    /// Parses an armored public key.
    pub fn from_armored(armored: &str) -> Result<Self, CryptoError> {
        let sec1 = unarmor(armored, "PELICAN PUBLIC KEY")?;
        let encryption =
            k256::PublicKey::from_sec1_bytes(&sec1).map_err(|_| CryptoError::InvalidKey)?;
        Ok(Self::from_k256(encryption))
    }

    /// Armors this public key for transport.
    #[must_use]
    pub fn armored(&self) -> String {
        armor(self.encryption.to_encoded_point(true).as_bytes(), "PELICAN PUBLIC KEY")
    }

    /// A stable hex fingerprint of the key material.
    #[must_use]
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}

/// One asymmetric key pair of a keyring.
pub struct Key {
    fingerprint: String,
    signing: SigningKey,
    decryption: SecretKey,
    primary: bool,
}

impl std::fmt::Debug for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Key")
            .field("fingerprint", &self.fingerprint)
            .field("primary", &self.primary)
            .finish_non_exhaustive()
    }
}

impl Key {
    /// Generates a fresh key pair. Key generation draws from the OS RNG and
    /// is treated as a suspension point by callers.
    #[must_use]
    pub fn generate(primary: bool) -> Self {
        let signing = SigningKey::generate(&mut OsRng);
        let decryption = SecretKey::random(&mut OsRng);
        let fingerprint = PublicKey::from_k256(decryption.public_key())
            .fingerprint()
            .to_owned();
        Self {
            fingerprint,
            signing,
            decryption,
            primary,
        }
    }

    /// The key's hex fingerprint.
    #[must_use]
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Whether the key is the keyring's primary key.
    #[must_use]
    pub const fn is_primary(&self) -> bool {
        self.primary
    }

    /// The public half used for sealing session keys.
    #[must_use]
    pub fn public_key(&self) -> PublicKey {
        PublicKey::from_k256(self.decryption.public_key())
    }

    /// Produces a detached signature over `data`.
    #[must_use]
    pub fn sign_detached(&self, data: &[u8]) -> Vec<u8> {
        self.signing.sign(data).to_bytes().to_vec()
    }

    /// Verifies a detached signature produced by [`Key::sign_detached`].
    pub fn verify_detached(&self, data: &[u8], signature: &[u8]) -> Result<(), CryptoError> {
        let signature: [u8; SIGNATURE_LEN] = signature
            .try_into()
            .map_err(|_| CryptoError::InvalidSignature)?;
        self.signing
            .verifying_key()
            .verify(data, &Signature::from_bytes(&signature))
            .map_err(|_| CryptoError::InvalidSignature)
    }

    /// Unseals a key packet produced by [`SessionKey::seal_to`].
    pub fn unseal(&self, key_packet: &[u8]) -> Result<SessionKey, CryptoError> {
        if key_packet.len() < SEC1_COMPRESSED_LEN + NONCE_LEN {
            return Err(CryptoError::Decrypt);
        }
        let (ephemeral, rest) = key_packet.split_at(SEC1_COMPRESSED_LEN);
        let (nonce, wrapped) = rest.split_at(NONCE_LEN);
        let ephemeral_pub =
            k256::PublicKey::from_sec1_bytes(ephemeral).map_err(|_| CryptoError::Decrypt)?;
        let shared = k256::ecdh::diffie_hellman(
            self.decryption.to_nonzero_scalar(),
            ephemeral_pub.as_affine(),
        );
        let wrap_key = derive_wrap_key(shared.raw_secret_bytes().as_slice())?;
        let cipher = Aes256Gcm::new_from_slice(&wrap_key).map_err(|_| CryptoError::Decrypt)?;
        let key = cipher
            .decrypt(Nonce::from_slice(nonce), wrapped)
            .map_err(|_| CryptoError::Decrypt)?;
        SessionKey::from_bytes(&key)
    }
}

/// An encrypted attachment split into its key and data packets.
#[derive(Debug)]
pub struct EncryptedAttachment {
    /// The session key sealed to the owning keyring.
    pub key_packet: Vec<u8>,
    /// The payload encrypted under the session key.
    pub data_packet: Vec<u8>,
}

/// A set of key pairs with at most one marked primary.
pub struct KeyRing {
    identity: String,
    keys: Vec<Key>,
}

impl std::fmt::Debug for KeyRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyRing")
            .field("identity", &self.identity)
            .field("keys", &self.keys.len())
            .finish()
    }
}

impl KeyRing {
    /// Generates a keyring with one primary key for `identity`.
    #[must_use]
    pub fn generate(identity: &str) -> Self {
        Self {
            identity: identity.to_owned(),
            keys: vec![Key::generate(true)],
        }
    }

    /// An empty, unusable keyring.
    #[must_use]
    pub fn empty(identity: &str) -> Self {
        Self {
            identity: identity.to_owned(),
            keys: Vec::new(),
        }
    }

    /// The identity (email) the keyring belongs to.
    #[must_use]
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// The first key of the ring.
    pub fn first_key(&self) -> Result<&Key, CryptoError> {
        self.keys.first().ok_or(CryptoError::MissingKey)
    }

    /// The primary key, falling back to the first key.
    pub fn primary_key(&self) -> Result<&Key, CryptoError> {
        self.keys
            .iter()
            .find(|key| key.primary)
            .map_or_else(|| self.first_key(), Ok)
    }

    /// The public half of the primary key.
    pub fn public_key(&self) -> Result<PublicKey, CryptoError> {
        Ok(self.primary_key()?.public_key())
    }

    /// The armored public half of the primary key.
    pub fn armored_public_key(&self) -> Result<String, CryptoError> {
        Ok(self.public_key()?.armored())
    }

    /// Signs `data` with the primary key.
    pub fn sign_detached(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        Ok(self.primary_key()?.sign_detached(data))
    }

    /// Encrypts an attachment under a fresh session key bound to `name`,
    /// sealing the session key to this keyring.
    pub fn encrypt_attachment(
        &self,
        name: &str,
        data: &[u8],
    ) -> Result<EncryptedAttachment, CryptoError> {
        let session_key = SessionKey::generate();
        let data_packet = session_key.encrypt(data, name)?;
        let key_packet = session_key.seal_to(&self.public_key()?)?;
        Ok(EncryptedAttachment {
            key_packet,
            data_packet,
        })
    }

    /// Recovers a session key from a key packet sealed to any key of this
    /// ring.
    pub fn decrypt_session_key(&self, key_packet: &[u8]) -> Result<SessionKey, CryptoError> {
        for key in &self.keys {
            if let Ok(session_key) = key.unseal(key_packet) {
                return Ok(session_key);
            }
        }
        Err(CryptoError::Decrypt)
    }

    /// Signs `plaintext` with the primary key, encrypts it under a fresh
    /// session key sealed to this ring and armors the result.
    pub fn encrypt_armored_signed(&self, plaintext: &[u8]) -> Result<String, CryptoError> {
        let key = self.primary_key()?;
        let mut inner = key.sign_detached(plaintext);
        inner.extend_from_slice(plaintext);

        let session_key = SessionKey::generate();
        let data_packet = session_key.encrypt(&inner, "")?;
        let key_packet = session_key.seal_to(&self.public_key()?)?;

        let key_packet_len =
            u16::try_from(key_packet.len()).map_err(|_| CryptoError::Encrypt)?;
        let mut packet = Vec::with_capacity(2 + key_packet.len() + data_packet.len());
        packet.extend_from_slice(&key_packet_len.to_be_bytes());
        packet.extend_from_slice(&key_packet);
        packet.extend_from_slice(&data_packet);
        Ok(armor(&packet, "PELICAN MESSAGE"))
    }

    /// Reverses [`KeyRing::encrypt_armored_signed`], verifying the inner
    /// signature.
    pub fn decrypt_armored(&self, armored: &str) -> Result<Vec<u8>, CryptoError> {
        let packet = unarmor(armored, "PELICAN MESSAGE")?;
        if packet.len() < 2 {
            return Err(CryptoError::Decrypt);
        }
        let key_packet_len = usize::from(u16::from_be_bytes([packet[0], packet[1]]));
        if packet.len() < 2 + key_packet_len {
            return Err(CryptoError::Decrypt);
        }
        let key_packet = &packet[2..2 + key_packet_len];
        let data_packet = &packet[2 + key_packet_len..];

        let session_key = self.decrypt_session_key(key_packet)?;
        let inner = session_key.decrypt(data_packet, "")?;
        if inner.len() < SIGNATURE_LEN {
            return Err(CryptoError::Decrypt);
        }
        let (signature, plaintext) = inner.split_at(SIGNATURE_LEN);
        self.primary_key()?.verify_detached(plaintext, signature)?;
        Ok(plaintext.to_vec())
    }
}

fn armor(bytes: &[u8], label: &str) -> String {
    let encoded = BASE64.encode(bytes);
    let mut out = format!("-----BEGIN {label}-----\r\n");
    for chunk in encoded.as_bytes().chunks(64) {
        out.push_str(&String::from_utf8_lossy(chunk));
        out.push_str("\r\n");
    }
    out.push_str(&format!("-----END {label}-----\r\n"));
    out
}

fn unarmor(armored: &str, label: &str) -> Result<Vec<u8>, CryptoError> {
    let begin = format!("-----BEGIN {label}-----");
    let end = format!("-----END {label}-----");
    let mut payload = String::new();
    let mut inside = false;
    for line in armored.lines() {
        let line = line.trim_end();
        if line == begin {
            inside = true;
        } else if line == end {
            return BASE64
                .decode(payload.as_bytes())
                .map_err(|_| CryptoError::InvalidArmor);
        } else if inside {
            payload.push_str(line);
        }
    }
    Err(CryptoError::InvalidArmor)
}
