use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const LOWERCASE: &str = "abcdefghijklmnopqrstuvwxyz";
pub const UPPERCASE: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ";
pub const DIGITS: &str = "0123456789";
pub const SYMBOLS: &str = "~!@#$%^&*()_+`-={}|[]\\:\"<>?,./";

pub const DEFAULT_LENGTH: usize = 18;

#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("password length must be greater than zero")]
    InvalidLength,
    #[error("secure random source failed: {0}")]
    RandomSource(String),
}

/// Character classes for generated passwords. Lowercase letters are always
/// part of the alphabet; the other classes can be switched off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationPolicy {
    pub uppercase: bool,
    pub digits: bool,
    pub symbols: bool,
}

impl Default for GenerationPolicy {
    fn default() -> Self {
        Self {
            uppercase: true,
            digits: true,
            symbols: true,
        }
    }
}

impl GenerationPolicy {
    #[must_use]
    pub fn alphabet(&self) -> Vec<char> {
        let mut alphabet = String::from(LOWERCASE);
        if self.uppercase {
            alphabet.push_str(UPPERCASE);
        }
        if self.digits {
            alphabet.push_str(DIGITS);
        }
        if self.symbols {
            alphabet.push_str(SYMBOLS);
        }
        alphabet.chars().collect()
    }
}

pub fn generate_password(length: usize, policy: &GenerationPolicy) -> Result<String, GenerateError> {
    generate_with(length, policy, fill_secure)
}

fn generate_with<F>(length: usize, policy: &GenerationPolicy, mut fill: F) -> Result<String, GenerateError>
where
    F: FnMut(&mut [u8]) -> Result<(), GenerateError>,
{
    if length == 0 {
        return Err(GenerateError::InvalidLength);
    }

    let alphabet = policy.alphabet();
    let mut output = String::with_capacity(length);
    for _ in 0..length {
        let index = sample_index(alphabet.len(), &mut fill)?;
        output.push(alphabet[index]);
    }
    Ok(output)
}

fn fill_secure(bytes: &mut [u8]) -> Result<(), GenerateError> {
    getrandom::fill(bytes).map_err(|error| GenerateError::RandomSource(error.to_string()))
}

// Rejection sampling: draws at or above the largest multiple of `limit` are
// discarded so every index is equally likely.
fn sample_index<F>(limit: usize, fill: &mut F) -> Result<usize, GenerateError>
where
    F: FnMut(&mut [u8]) -> Result<(), GenerateError>,
{
    let limit = limit as u64;
    let max = u64::MAX - (u64::MAX % limit);
    loop {
        let mut bytes = [0_u8; 8];
        fill(&mut bytes)?;
        let candidate = u64::from_le_bytes(bytes);
        if candidate < max {
            return Ok((candidate % limit) as usize);
        }
    }
}
