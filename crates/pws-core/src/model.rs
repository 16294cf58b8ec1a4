use std::fmt;

use serde::Serialize;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{KEY_ID_FILE, OTP_URI_PREFIX, SECRET_SUFFIX};

const PAIR_SEPARATOR: &str = ": ";
const KEYLESS_VALUE_PREFIX: &str = "//";
const OTP_PASSWORD_PREFIX: &str = "otpauth://totp/";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NameError {
    #[error("secret name is empty")]
    Empty,
    #[error("invalid segment `{0}` in secret name")]
    InvalidSegment(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("no password set")]
    EmptyPassword,
    #[error("no password set: the first line is an otpauth URI")]
    PasswordIsOtp,
    #[error("password must be a single line")]
    MultilinePassword,
}

/// Slash-delimited secret identifier, relative to the store root.
///
/// The encrypted-file suffix is never part of a name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct SecretName(String);

impl SecretName {
    pub fn parse(raw: &str) -> Result<Self, NameError> {
        let trimmed = raw.trim_matches('/');
        let name = trimmed.strip_suffix(SECRET_SUFFIX).unwrap_or(trimmed);
        if name.is_empty() {
            return Err(NameError::Empty);
        }

        for segment in name.split('/') {
            if segment.is_empty() || segment == "." || segment == ".." || segment == KEY_ID_FILE {
                return Err(NameError::InvalidSegment(segment.to_owned()));
            }
        }

        Ok(Self(name.to_owned()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// All segments but the last, or `""` for a top-level secret.
    #[must_use]
    pub fn namespace(&self) -> &str {
        self.0
            .rsplit_once('/')
            .map(|(namespace, _)| namespace)
            .unwrap_or("")
    }

    #[must_use]
    pub fn bare(&self) -> &str {
        self.0
            .rsplit_once('/')
            .map(|(_, bare)| bare)
            .unwrap_or(&self.0)
    }

    /// True when the secret lives in `namespace` or any namespace below it.
    #[must_use]
    pub fn is_within(&self, namespace: &str) -> bool {
        let namespace = namespace.trim_matches('/');
        if namespace.is_empty() {
            return true;
        }
        let own = self.namespace();
        own == namespace
            || own
                .strip_prefix(namespace)
                .is_some_and(|rest| rest.starts_with('/'))
    }
}

impl fmt::Display for SecretName {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Zeroize, ZeroizeOnDrop)]
pub struct Pair {
    pub key: Option<String>,
    pub value: String,
}

impl Pair {
    #[must_use]
    pub fn keyless(value: &str) -> Self {
        Self {
            key: None,
            value: value.to_owned(),
        }
    }

    #[must_use]
    pub fn keyed(key: &str, value: &str) -> Self {
        Self {
            key: Some(key.to_owned()),
            value: value.to_owned(),
        }
    }

    fn parse(line: &str) -> Self {
        match line.split_once(PAIR_SEPARATOR) {
            Some((key, value)) if !value.starts_with(KEYLESS_VALUE_PREFIX) => {
                Self::keyed(key, value)
            }
            _ => Self::keyless(line),
        }
    }

    #[must_use]
    pub fn to_line(&self) -> String {
        match &self.key {
            Some(key) => format!("{key}{PAIR_SEPARATOR}{}", self.value),
            None => self.value.clone(),
        }
    }

    fn key_matches(&self, key: &str, case_insensitive: bool) -> bool {
        match &self.key {
            Some(own) if case_insensitive => own.to_lowercase() == key.to_lowercase(),
            Some(own) => own == key,
            None => false,
        }
    }
}

/// Decoded plaintext of one secret: password line, body pairs and the
/// first TOTP URI found after the password line.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Zeroize, ZeroizeOnDrop)]
pub struct SecretRecord {
    pub password: String,
    pub pairs: Vec<Pair>,
    pub otp_uri: Option<String>,
}

impl SecretRecord {
    #[must_use]
    pub fn decode(plaintext: &str) -> Self {
        let mut lines = plaintext.split('\n');
        let password = lines.next().unwrap_or_default().to_owned();

        let mut pairs = Vec::new();
        let mut otp_uri = None;
        for line in lines {
            if line.is_empty() {
                continue;
            }
            if otp_uri.is_none() && line.starts_with(OTP_URI_PREFIX) {
                otp_uri = Some(line.to_owned());
            }
            pairs.push(Pair::parse(line));
        }

        Self {
            password,
            pairs,
            otp_uri,
        }
    }

    #[must_use]
    pub fn encode(&self) -> String {
        let mut lines = Vec::with_capacity(self.pairs.len() + 1);
        lines.push(self.password.clone());
        lines.extend(self.pairs.iter().map(Pair::to_line));
        lines.join("\n")
    }

    /// The usable password, rejecting an empty first line or one that holds
    /// an otpauth URI instead of a password.
    pub fn password_of(&self) -> Result<&str, CodecError> {
        if self.password.is_empty() {
            return Err(CodecError::EmptyPassword);
        }
        if self.password.starts_with(OTP_PASSWORD_PREFIX) {
            return Err(CodecError::PasswordIsOtp);
        }
        Ok(&self.password)
    }

    #[must_use]
    pub fn lookup(&self, key: &str, case_insensitive: bool) -> Vec<&str> {
        self.pairs
            .iter()
            .filter(|pair| pair.key_matches(key, case_insensitive))
            .map(|pair| pair.value.as_str())
            .collect()
    }

    #[must_use]
    pub fn search(&self, key: &str, needle: &str) -> Vec<&Pair> {
        let needle = needle.to_lowercase();
        self.pairs
            .iter()
            .filter(|pair| pair.key_matches(key, true))
            .filter(|pair| pair.value.to_lowercase().contains(&needle))
            .collect()
    }
}

/// Replaces the password line of `old_plaintext`, leaving every other line
/// byte-for-byte intact. An absent secret is passed as `""`.
pub fn set_password(old_plaintext: &str, new_password: &str) -> Result<String, CodecError> {
    if new_password.contains('\n') {
        return Err(CodecError::MultilinePassword);
    }

    Ok(match old_plaintext.split_once('\n') {
        Some((_, rest)) => format!("{new_password}\n{rest}"),
        None => new_password.to_owned(),
    })
}
