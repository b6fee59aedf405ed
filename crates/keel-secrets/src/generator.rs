//! Secret Generator
//!
//! Draws bytes from an [`EntropySource`] and maps them onto the policy's
//! alphabet with rejection sampling, so every character is equally likely.
//! No alphabet contains quotes, `$`, whitespace, or shell metacharacters.

use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::{Zeroize, Zeroizing};

use keel_common::schema::Charset;

use crate::error::GenerationError;
use crate::policy::SecretPolicy;

const ALPHANUMERIC: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
const ALPHANUMERIC_SYMBOLS: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_.~";
const HEX: &[u8] = b"0123456789abcdef";

/// Source of cryptographically secure random bytes
pub trait EntropySource: Send + Sync {
    /// Fill `buf` entirely or fail
    fn fill(&self, buf: &mut [u8]) -> Result<(), GenerationError>;
}

/// The operating system's CSPRNG
#[derive(Clone, Copy, Debug, Default)]
pub struct OsEntropy;

impl EntropySource for OsEntropy {
    fn fill(&self, buf: &mut [u8]) -> Result<(), GenerationError> {
        OsRng
            .try_fill_bytes(buf)
            .map_err(|e| GenerationError::EntropyUnavailable {
                message: e.to_string(),
            })
    }
}

/// Characters a charset may produce
pub fn alphabet(charset: Charset) -> &'static [u8] {
    match charset {
        Charset::Alphanumeric => ALPHANUMERIC,
        Charset::AlphanumericSymbols => ALPHANUMERIC_SYMBOLS,
        Charset::Hex => HEX,
    }
}

/// Generate a value satisfying `policy`
pub fn generate(
    policy: &SecretPolicy,
    entropy: &dyn EntropySource,
) -> Result<Zeroizing<String>, GenerationError> {
    if policy.length == 0 || policy.length < policy.min_length {
        return Err(GenerationError::InvalidLength {
            length: policy.length,
            min_length: policy.min_length,
        });
    }

    let alphabet = alphabet(policy.charset);
    // Largest multiple of the alphabet size that fits in a byte; bytes at or
    // above it are rejected to avoid modulo bias.
    let limit = 256 - (256 % alphabet.len());

    let mut out = Zeroizing::new(String::with_capacity(policy.length));
    let mut buf = vec![0u8; policy.length * 2];
    while out.len() < policy.length {
        entropy.fill(&mut buf)?;
        for &b in buf.iter() {
            if usize::from(b) < limit {
                out.push(char::from(alphabet[usize::from(b) % alphabet.len()]));
                if out.len() == policy.length {
                    break;
                }
            }
        }
    }
    buf.zeroize();
    Ok(out)
}
