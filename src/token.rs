use std::{fmt, sync::Arc};

use rand::Rng;
use rearch::CapsuleHandle;
use thiserror::Error;

/// The 64 symbols a [`ShortToken`] may contain.
/// All of them are path-safe, so a token never needs percent-encoding.
pub const ALPHABET: &[u8; 64] =
    b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ-_";

/// Length of every token produced by [`RandomTokenGenerator`].
pub const GENERATED_TOKEN_LEN: usize = 8;

/// Longest token accepted by [`ShortToken::new`].
pub const MAX_TOKEN_LEN: usize = 32;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ShortToken(String);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ShortTokenValidationError {
    #[error("short token must not be empty")]
    Empty,
    #[error("short token is {len} characters long; at most {max} are allowed")]
    TooLong { len: usize, max: usize },
    #[error("short token contains invalid characters: {invalid_chars}")]
    InvalidCharacters { invalid_chars: String },
}

impl ShortToken {
    /// # Errors
    /// Returns [`Err`] when the token is empty, longer than [`MAX_TOKEN_LEN`],
    /// or contains characters outside of [`ALPHABET`].
    pub fn new(token: String) -> Result<Self, ShortTokenValidationError> {
        if token.is_empty() {
            return Err(ShortTokenValidationError::Empty);
        }

        let len = token.chars().count();
        if len > MAX_TOKEN_LEN {
            return Err(ShortTokenValidationError::TooLong {
                len,
                max: MAX_TOKEN_LEN,
            });
        }

        let invalid_chars: String = token
            .chars()
            .filter(|c| !u8::try_from(*c).is_ok_and(|b| ALPHABET.contains(&b)))
            .collect();
        if !invalid_chars.is_empty() {
            return Err(ShortTokenValidationError::InvalidCharacters { invalid_chars });
        }

        Ok(Self(token))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for ShortToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Produces short tokens without consulting storage.
///
/// Nothing here guarantees uniqueness; callers must rely on the store
/// rejecting a token that is already taken.
pub trait TokenGenerator: Send + Sync {
    fn generate(&self) -> ShortToken;
}

pub fn token_generator_capsule(_: CapsuleHandle) -> Arc<dyn TokenGenerator> {
    Arc::new(RandomTokenGenerator)
}

/// Draws [`GENERATED_TOKEN_LEN`] symbols uniformly from [`ALPHABET`]
/// using the thread-local CSPRNG.
///
/// # Panics
/// Panics if the operating system's randomness source fails;
/// this is treated as unrecoverable.
pub struct RandomTokenGenerator;

impl TokenGenerator for RandomTokenGenerator {
    fn generate(&self) -> ShortToken {
        let mut bytes = [0; GENERATED_TOKEN_LEN];
        rand::rng().fill_bytes(&mut bytes);
        ShortToken(encode(bytes))
    }
}

// NOTE: 64 symbols means the low 6 bits of a byte select one exactly uniformly
fn encode(bytes: [u8; GENERATED_TOKEN_LEN]) -> String {
    bytes
        .iter()
        .map(|byte| char::from(ALPHABET[usize::from(byte & 0x3F)]))
        .collect()
}
