//! The operation envelope: the string produced by an encode and consumed by
//! a decode.
//!
//! ```text
//! symmetric:   base64(ciphertext) + "-SEPARATOR-" + base64(iv)
//! asymmetric:  base64(ciphertext)
//! ```
//!
//! Base64 is the standard alphabet with padding and no line breaks. The
//! alphabet has no `-`, so the separator can't appear inside either half.
//! Any format violation is [`GateError::MalformedEnvelope`], never a crypto
//! error.

use std::fmt;
use std::str::FromStr;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use crate::crypto::NONCE_LEN;
use crate::error::GateError;

/// Separator between ciphertext and IV in a symmetric envelope.
pub const SEPARATOR: &str = "-SEPARATOR-";

/// A parsed symmetric envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub ciphertext: Vec<u8>,
    pub iv: [u8; NONCE_LEN],
}

impl Envelope {
    pub fn new(ciphertext: Vec<u8>, iv: [u8; NONCE_LEN]) -> Self {
        Self { ciphertext, iv }
    }

    pub fn parse(input: &str) -> Result<Self, GateError> {
        let (body, iv) = input.split_once(SEPARATOR).ok_or_else(|| {
            GateError::MalformedEnvelope(
                "missing separator, the input was not produced by encode".to_string(),
            )
        })?;

        let ciphertext = decode_part(body, "ciphertext")?;
        let iv: [u8; NONCE_LEN] = decode_part(iv, "iv")?.try_into().map_err(|v: Vec<u8>| {
            GateError::MalformedEnvelope(format!("iv must be {NONCE_LEN} bytes, got {}", v.len()))
        })?;
        Ok(Self { ciphertext, iv })
    }
}

impl fmt::Display for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{SEPARATOR}{}",
            STANDARD.encode(&self.ciphertext),
            STANDARD.encode(self.iv)
        )
    }
}

impl FromStr for Envelope {
    type Err = GateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Encode asymmetric ciphertext. No IV travels with it.
pub(crate) fn encode_asymmetric(ciphertext: &[u8]) -> String {
    STANDARD.encode(ciphertext)
}

/// Parse asymmetric ciphertext.
pub(crate) fn parse_asymmetric(input: &str) -> Result<Vec<u8>, GateError> {
    let bytes = decode_part(input, "ciphertext")?;
    if bytes.is_empty() {
        return Err(GateError::MalformedEnvelope("empty ciphertext".to_string()));
    }
    Ok(bytes)
}

fn decode_part(part: &str, what: &str) -> Result<Vec<u8>, GateError> {
    STANDARD
        .decode(part)
        .map_err(|e| GateError::MalformedEnvelope(format!("{what} is not valid base64: {e}")))
}
