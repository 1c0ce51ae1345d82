//! Encrypt-then-MAC token codec.
//!
//! # Responsibilities
//! - Turn a claim map into an opaque URL-safe string and back
//! - Optionally encrypt the payload (AES-CTR, key size picks AES-128/192/256)
//! - Authenticate the payload with an HMAC whose digest follows the key size
//! - Enforce a maximum token age through a reserved issued-at claim
//!
//! # Wire Layout
//! ```text
//! base64url( [iv(16)] || payload || mac )
//! payload = JSON(claims), AES-CTR encrypted when a block key is set
//! ```
//!
//! # Design Decisions
//! - MAC and cipher state are built per call, the codec is shareable as-is
//! - Tags are compared in constant time (`Mac::verify_slice`)
//! - The clock is injectable so expiry can be tested deterministically

use std::sync::Arc;

use aes::{Aes128, Aes192, Aes256};
use base64::engine::general_purpose::URL_SAFE;
use base64::Engine as _;
use ctr::cipher::{KeyIvInit, StreamCipher};
use hmac::digest::KeyInit;
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde_json::{Map, Value};
use thiserror::Error;

/// Reserved claim holding the issue time in unix seconds.
pub const ISSUED_AT_KEY: &str = "_ct";

const IV_SIZE: usize = 16;
const DEFAULT_HASH_KEY_SIZE: usize = 16;

pub type Claims = Map<String, Value>;

/// Source of the current unix time in seconds.
pub type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

pub fn system_clock() -> Clock {
    Arc::new(|| chrono::Utc::now().timestamp())
}

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("token is not valid")]
    MacInvalid,

    #[error("token could not be decrypted")]
    Decrypt,

    #[error("token used before issued")]
    Timestamp,

    #[error("token is expired")]
    Expired,

    #[error("token encoding: {0}")]
    Encoding(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MacAlgorithm {
    Sha1,
    Sha256,
    Sha384,
    Sha512,
}

impl MacAlgorithm {
    fn for_key(key: &[u8]) -> Self {
        match key.len() {
            n if n < 32 => Self::Sha1,
            n if n < 48 => Self::Sha256,
            n if n < 64 => Self::Sha384,
            _ => Self::Sha512,
        }
    }

    fn size(self) -> usize {
        match self {
            Self::Sha1 => 20,
            Self::Sha256 => 32,
            Self::Sha384 => 48,
            Self::Sha512 => 64,
        }
    }
}

fn sign_with<M: Mac + KeyInit>(key: &[u8], data: &[u8]) -> Result<Vec<u8>, TokenError> {
    let mut mac = <M as Mac>::new_from_slice(key)
        .map_err(|_| TokenError::InvalidKey("hash key rejected".into()))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

fn verify_with<M: Mac + KeyInit>(key: &[u8], data: &[u8], tag: &[u8]) -> bool {
    match <M as Mac>::new_from_slice(key) {
        Ok(mut mac) => {
            mac.update(data);
            mac.verify_slice(tag).is_ok()
        }
        Err(_) => false,
    }
}

fn apply_keystream(key: &[u8], iv: &[u8], data: &mut [u8]) -> Result<(), TokenError> {
    let invalid = |_| TokenError::InvalidKey(format!("block key of {} bytes", key.len()));
    match key.len() {
        16 => ctr::Ctr128BE::<Aes128>::new_from_slices(key, iv)
            .map_err(invalid)?
            .apply_keystream(data),
        24 => ctr::Ctr128BE::<Aes192>::new_from_slices(key, iv)
            .map_err(invalid)?
            .apply_keystream(data),
        32 => ctr::Ctr128BE::<Aes256>::new_from_slices(key, iv)
            .map_err(invalid)?
            .apply_keystream(data),
        n => return Err(TokenError::InvalidKey(format!("block key of {n} bytes"))),
    }
    Ok(())
}

/// Random bytes from the thread RNG.
pub fn random_bytes(n: usize) -> Vec<u8> {
    let mut buf = vec![0u8; n];
    rand::thread_rng().fill_bytes(&mut buf);
    buf
}

#[derive(Clone)]
pub struct TokenCodec {
    max_age: i64,
    hash_key: Vec<u8>,
    block_key: Option<Vec<u8>>,
    algorithm: MacAlgorithm,
    clock: Clock,
}

impl std::fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCodec")
            .field("max_age", &self.max_age)
            .field("algorithm", &self.algorithm)
            .field("encrypted", &self.block_key.is_some())
            .finish()
    }
}

impl TokenCodec {
    /// Create a codec.
    ///
    /// `max_age <= 0` disables expiry. A missing hash key is replaced by 16
    /// random bytes, so tokens do not survive a restart. A block key must be
    /// 16, 24 or 32 bytes long.
    pub fn new(
        max_age: i64,
        hash_key: Option<Vec<u8>>,
        block_key: Option<Vec<u8>>,
    ) -> Result<Self, TokenError> {
        let hash_key = match hash_key {
            Some(key) if !key.is_empty() => key,
            _ => random_bytes(DEFAULT_HASH_KEY_SIZE),
        };
        let block_key = block_key.filter(|key| !key.is_empty());
        if let Some(key) = block_key.as_ref() {
            if !matches!(key.len(), 16 | 24 | 32) {
                return Err(TokenError::InvalidKey(format!(
                    "block key must be 16, 24 or 32 bytes, got {}",
                    key.len()
                )));
            }
        }

        Ok(Self {
            max_age,
            algorithm: MacAlgorithm::for_key(&hash_key),
            hash_key,
            block_key,
            clock: system_clock(),
        })
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Maximum age in seconds; `<= 0` means no limit.
    pub fn max_age(&self) -> i64 {
        self.max_age
    }

    pub fn now(&self) -> i64 {
        (self.clock)()
    }

    pub fn mac_size(&self) -> usize {
        self.algorithm.size()
    }

    fn sign(&self, data: &[u8]) -> Result<Vec<u8>, TokenError> {
        match self.algorithm {
            MacAlgorithm::Sha1 => sign_with::<Hmac<sha1::Sha1>>(&self.hash_key, data),
            MacAlgorithm::Sha256 => sign_with::<Hmac<sha2::Sha256>>(&self.hash_key, data),
            MacAlgorithm::Sha384 => sign_with::<Hmac<sha2::Sha384>>(&self.hash_key, data),
            MacAlgorithm::Sha512 => sign_with::<Hmac<sha2::Sha512>>(&self.hash_key, data),
        }
    }

    fn verify(&self, data: &[u8], tag: &[u8]) -> bool {
        match self.algorithm {
            MacAlgorithm::Sha1 => verify_with::<Hmac<sha1::Sha1>>(&self.hash_key, data, tag),
            MacAlgorithm::Sha256 => verify_with::<Hmac<sha2::Sha256>>(&self.hash_key, data, tag),
            MacAlgorithm::Sha384 => verify_with::<Hmac<sha2::Sha384>>(&self.hash_key, data, tag),
            MacAlgorithm::Sha512 => verify_with::<Hmac<sha2::Sha512>>(&self.hash_key, data, tag),
        }
    }

    /// Encode `claims`. With a positive max age the issue time is stamped
    /// under [`ISSUED_AT_KEY`].
    pub fn encode(&self, claims: &Claims) -> Result<String, TokenError> {
        let mut claims = claims.clone();
        if self.max_age > 0 {
            claims.insert(ISSUED_AT_KEY.to_string(), Value::from(self.now()));
        }

        let json = serde_json::to_vec(&claims).map_err(|e| TokenError::Encoding(e.to_string()))?;

        let mut data = match self.block_key.as_ref() {
            Some(key) => {
                let iv = random_bytes(IV_SIZE);
                let mut ciphertext = json;
                apply_keystream(key, &iv, &mut ciphertext)?;
                let mut out = iv;
                out.extend_from_slice(&ciphertext);
                out
            }
            None => json,
        };

        let tag = self.sign(&data)?;
        data.extend_from_slice(&tag);
        Ok(URL_SAFE.encode(data))
    }

    /// Decode and authenticate `token`.
    ///
    /// The returned claims include [`ISSUED_AT_KEY`] when the codec has a
    /// positive max age.
    pub fn decode(&self, token: &str) -> Result<Claims, TokenError> {
        let raw = URL_SAFE
            .decode(token.as_bytes())
            .map_err(|e| TokenError::Encoding(e.to_string()))?;

        if raw.len() <= self.mac_size() {
            return Err(TokenError::MacInvalid);
        }
        let (data, tag) = raw.split_at(raw.len() - self.mac_size());
        if !self.verify(data, tag) {
            return Err(TokenError::MacInvalid);
        }

        let payload = match self.block_key.as_ref() {
            Some(key) => {
                if data.len() <= IV_SIZE {
                    return Err(TokenError::Decrypt);
                }
                let (iv, ciphertext) = data.split_at(IV_SIZE);
                let mut plain = ciphertext.to_vec();
                apply_keystream(key, iv, &mut plain).map_err(|_| TokenError::Decrypt)?;
                plain
            }
            None => data.to_vec(),
        };

        let claims: Claims =
            serde_json::from_slice(&payload).map_err(|e| TokenError::Encoding(e.to_string()))?;

        if self.max_age > 0 {
            let issued = claims
                .get(ISSUED_AT_KEY)
                .and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|f| f as i64)))
                .unwrap_or(0);
            if issued == 0 {
                return Err(TokenError::Timestamp);
            }
            let age = self.now() - issued;
            if age < 0 {
                return Err(TokenError::Timestamp);
            }
            if age > self.max_age {
                return Err(TokenError::Expired);
            }
        }

        Ok(claims)
    }
}
