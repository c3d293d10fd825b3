//! Join codes for circles.
//!
//! A join code is exactly six characters from `[A-Z0-9]`. Codes are
//! drawn uniformly at random; the registry retries on collision.

use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

use super::error::{CircleError, Result};

/// Number of characters in a join code.
pub const JOIN_CODE_LEN: usize = 6;

/// Symbols a join code is drawn from.
pub const JOIN_CODE_ALPHABET: &[u8; 36] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// A validated circle join code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct JoinCode(String);

impl JoinCode {
    /// Validates a join code. Matching is case-sensitive.
    ///
    /// # Errors
    ///
    /// Returns [`CircleError::InvalidInput`] unless `code` is six
    /// characters from `[A-Z0-9]`.
    pub fn parse(code: &str) -> Result<Self> {
        let valid = code.len() == JOIN_CODE_LEN
            && code.bytes().all(|b| JOIN_CODE_ALPHABET.contains(&b));
        if !valid {
            return Err(CircleError::InvalidInput(format!(
                "join code must be {JOIN_CODE_LEN} characters from [A-Z0-9], got {code:?}"
            )));
        }
        Ok(Self(code.to_string()))
    }

    /// Draws a code uniformly at random.
    #[must_use]
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let code = (0..JOIN_CODE_LEN)
            .map(|_| char::from(JOIN_CODE_ALPHABET[rng.gen_range(0..JOIN_CODE_ALPHABET.len())]))
            .collect();
        Self(code)
    }

    /// The code as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JoinCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for JoinCode {
    type Error = CircleError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<JoinCode> for String {
    fn from(code: JoinCode) -> Self {
        code.0
    }
}

/// Source of candidate join codes.
///
/// The registry asks for a new candidate after every collision.
pub trait JoinCodeSource: Send + Sync {
    /// Returns the next candidate code.
    fn next_code(&self) -> JoinCode;
}

/// Uniform random codes from the thread-local RNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomJoinCodes;

impl JoinCodeSource for RandomJoinCodes {
    fn next_code(&self) -> JoinCode {
        JoinCode::random(&mut rand::thread_rng())
    }
}
