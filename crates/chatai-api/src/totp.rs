//! Time-based one-time passcodes (RFC 6238, HMAC-SHA1, 6 digits).
//!
//! The step is five minutes so a code survives the round trip through the
//! sign-in form. Only the current step is accepted.

use anyhow::Result;
use hmac::{Hmac, Mac};
use sha1::Sha1;

type HmacSha1 = Hmac<Sha1>;

pub const STEP_SECS: u64 = 300;
pub const DIGITS: usize = 6;

/// A generated passcode and the unix time at which its step ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Otp {
    pub code: String,
    pub expires_at: u64,
}

pub struct Totp {
    key: Vec<u8>,
}

impl Totp {
    pub fn new(key: impl Into<Vec<u8>>) -> Self {
        Self { key: key.into() }
    }

    /// Per-user generator keyed on the email and the server secret.
    pub fn for_email(email: &str, secret: &str) -> Self {
        Self::new(format!("{}{}", email, secret))
    }

    pub fn generate(&self, unix_secs: u64) -> Result<Otp> {
        let counter = unix_secs / STEP_SECS;
        Ok(Otp {
            code: hotp(&self.key, counter)?,
            expires_at: (counter + 1) * STEP_SECS,
        })
    }

    pub fn verify(&self, code: &str, unix_secs: u64) -> Result<bool> {
        if code.len() != DIGITS || !code.bytes().all(|b| b.is_ascii_digit()) {
            return Ok(false);
        }
        let expected = hotp(&self.key, unix_secs / STEP_SECS)?;
        Ok(constant_time_eq(expected.as_bytes(), code.as_bytes()))
    }
}

/// RFC 4226 HOTP value for `counter`.
pub fn hotp(key: &[u8], counter: u64) -> Result<String> {
    let mut mac = HmacSha1::new_from_slice(key)
        .map_err(|e| anyhow::anyhow!("Invalid HMAC key: {}", e))?;
    mac.update(&counter.to_be_bytes());
    let digest = mac.finalize().into_bytes();

    // Dynamic truncation
    let offset = (digest[digest.len() - 1] & 0x0f) as usize;
    let binary = u32::from_be_bytes([
        digest[offset] & 0x7f,
        digest[offset + 1],
        digest[offset + 2],
        digest[offset + 3],
    ]);

    let code = binary % 10u32.pow(DIGITS as u32);
    Ok(format!("{:0width$}", code, width = DIGITS))
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
