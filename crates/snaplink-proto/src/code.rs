//! Pairing codes.
//!
//! A pairing code is the routing key the relay uses to join an agent and a
//! client: exactly six ASCII digits, leading zeros allowed.

use std::fmt;
use std::str::FromStr;

use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::ProtoError;

/// Number of digits in a pairing code.
pub const CODE_LEN: usize = 6;

/// A validated six-digit pairing code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PairingCode(String);

impl PairingCode {
    /// Validate `code` and wrap it.
    pub fn parse(code: &str) -> Result<Self, ProtoError> {
        if is_valid(code) {
            Ok(Self(code.to_string()))
        } else {
            Err(ProtoError::InvalidCode(code.to_string()))
        }
    }

    /// Generate a fresh code.
    ///
    /// Mixes the wall clock, 16 random bytes and host identity through
    /// SHA-256, takes the first 32 bits modulo 1,000,000 and zero-pads the
    /// result, so two machines started in the same millisecond still diverge.
    pub fn generate() -> Self {
        let mut random = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut random);

        let host = std::env::var("HOSTNAME")
            .or_else(|_| std::env::var("COMPUTERNAME"))
            .unwrap_or_else(|_| "unknown".to_string());

        let mut hasher = Sha256::new();
        hasher.update(chrono::Utc::now().timestamp_millis().to_be_bytes());
        hasher.update(random);
        hasher.update(host.as_bytes());
        hasher.update(std::env::consts::OS.as_bytes());
        hasher.update(std::env::consts::ARCH.as_bytes());
        let digest = hasher.finalize();

        let prefix = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
        Self(format!("{:06}", prefix % 1_000_000))
    }

    /// The code as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn is_valid(code: &str) -> bool {
    code.len() == CODE_LEN && code.bytes().all(|b| b.is_ascii_digit())
}

impl FromStr for PairingCode {
    type Err = ProtoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for PairingCode {
    type Error = ProtoError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if is_valid(&value) {
            Ok(Self(value))
        } else {
            Err(ProtoError::InvalidCode(value))
        }
    }
}

impl From<PairingCode> for String {
    fn from(code: PairingCode) -> Self {
        code.0
    }
}

impl fmt::Display for PairingCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
