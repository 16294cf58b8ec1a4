use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use data_encoding::{BASE32, BASE32_NOPAD};
use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::{Sha256, Sha512};
use thiserror::Error;
use url::Url;

pub const DEFAULT_PERIOD: u64 = 30;
pub const DEFAULT_DIGITS: u8 = 6;

/// Codes with fewer seconds left than this are skipped when waiting for a
/// fresh window.
pub const FRESH_WINDOW_MIN_SECONDS: u64 = 3;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TotpError {
    #[error("invalid otpauth URI: {0}")]
    InvalidOtpUri(String),
    #[error("invalid TOTP config: {0}")]
    InvalidConfig(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TotpAlgorithm {
    Sha1,
    Sha256,
    Sha512,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TotpConfig {
    pub seed: Vec<u8>,
    pub issuer: Option<String>,
    pub algorithm: TotpAlgorithm,
    pub digits: u8,
    pub period: u64,
}

impl TotpConfig {
    pub fn validate(&self) -> Result<(), TotpError> {
        if self.seed.is_empty() {
            return Err(TotpError::InvalidConfig("seed cannot be empty".to_owned()));
        }
        if !(6..=8).contains(&self.digits) {
            return Err(TotpError::InvalidConfig(
                "digits must be between 6 and 8".to_owned(),
            ));
        }
        if self.period == 0 {
            return Err(TotpError::InvalidConfig(
                "period must be greater than zero".to_owned(),
            ));
        }
        Ok(())
    }
}

/// Position of a timestamp inside its TOTP period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TotpWindow {
    pub period: u64,
    pub elapsed: u64,
    pub remaining: u64,
}

impl TotpWindow {
    #[must_use]
    pub fn at(period: u64, unix_seconds: u64) -> Self {
        let elapsed = unix_seconds % period;
        Self {
            period,
            elapsed,
            remaining: period - elapsed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TotpCode {
    pub code: String,
    pub remaining_seconds: u64,
    pub period: u64,
    pub at: u64,
}

pub trait Clock {
    fn unix_seconds(&self) -> u64;
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn unix_seconds(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    }

    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// Derives the current code for an otpauth URI.
#[derive(Debug, Clone, Default)]
pub struct TotpDeriver<C = SystemClock> {
    clock: C,
}

impl<C: Clock> TotpDeriver<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }

    /// Computes the code valid at the clock's current time.
    ///
    /// With `wait_for_fresh` set and fewer than [`FRESH_WINDOW_MIN_SECONDS`]
    /// left in the window, blocks for `remaining + 1` seconds and derives the
    /// code of the next window instead.
    pub fn current_code(&self, uri: &str, wait_for_fresh: bool) -> Result<TotpCode, TotpError> {
        let config = parse_otpauth_uri(uri)?;
        let mut now = self.clock.unix_seconds();

        let window = TotpWindow::at(config.period, now);
        if wait_for_fresh && window.remaining < FRESH_WINDOW_MIN_SECONDS {
            self.clock.sleep(Duration::from_secs(window.remaining + 1));
            now = self.clock.unix_seconds();
        }

        code_at(&config, now)
    }
}

pub fn code_at(config: &TotpConfig, unix_seconds: u64) -> Result<TotpCode, TotpError> {
    let code = generate_totp(config, unix_seconds)?;
    let window = TotpWindow::at(config.period, unix_seconds);
    Ok(TotpCode {
        code,
        remaining_seconds: window.remaining,
        period: config.period,
        at: unix_seconds,
    })
}

pub fn decode_base32_secret(secret: &str) -> Result<Vec<u8>, TotpError> {
    let normalized: String = secret
        .chars()
        .filter(|character| !character.is_whitespace() && *character != '-')
        .map(|character| character.to_ascii_uppercase())
        .collect();
    let invalid = || TotpError::InvalidOtpUri("invalid base32 secret".to_owned());
    if normalized.is_empty() {
        return Err(invalid());
    }

    let decoded = BASE32
        .decode(normalized.as_bytes())
        .or_else(|_| BASE32_NOPAD.decode(normalized.trim_end_matches('=').as_bytes()))
        .map_err(|_| invalid())?;
    if decoded.is_empty() {
        return Err(invalid());
    }

    Ok(decoded)
}

pub fn parse_otpauth_uri(uri: &str) -> Result<TotpConfig, TotpError> {
    let parsed = Url::parse(uri.trim()).map_err(|error| TotpError::InvalidOtpUri(error.to_string()))?;
    if parsed.scheme() != "otpauth" {
        return Err(TotpError::InvalidOtpUri(
            "scheme must be `otpauth`".to_owned(),
        ));
    }
    if parsed.host_str() != Some("totp") {
        return Err(TotpError::InvalidOtpUri("type must be `totp`".to_owned()));
    }

    let mut secret: Option<String> = None;
    let mut issuer: Option<String> = None;
    let mut algorithm = TotpAlgorithm::Sha1;
    let mut digits = DEFAULT_DIGITS;
    let mut period = DEFAULT_PERIOD;

    for (key, value) in parsed.query_pairs() {
        match key.to_ascii_lowercase().as_str() {
            "secret" => secret = Some(value.into_owned()),
            "issuer" => issuer = Some(value.into_owned()),
            "algorithm" => algorithm = parse_algorithm(value.as_ref())?,
            "digits" => {
                digits = value.parse::<u8>().map_err(|_| {
                    TotpError::InvalidOtpUri("digits must be an integer".to_owned())
                })?;
            }
            "period" => {
                period = value.parse::<u64>().map_err(|_| {
                    TotpError::InvalidOtpUri("period must be an integer".to_owned())
                })?;
            }
            _ => {}
        }
    }

    let seed = decode_base32_secret(secret.as_deref().ok_or_else(|| {
        TotpError::InvalidOtpUri("missing `secret` query parameter".to_owned())
    })?)?;
    let config = TotpConfig {
        seed,
        issuer: issuer.filter(|value| !value.is_empty()),
        algorithm,
        digits,
        period,
    };
    config.validate().map_err(|error| match error {
        TotpError::InvalidConfig(reason) => TotpError::InvalidOtpUri(reason),
        other => other,
    })?;
    Ok(config)
}

pub fn generate_totp(config: &TotpConfig, unix_seconds: u64) -> Result<String, TotpError> {
    config.validate()?;

    let counter = unix_seconds / config.period;
    let counter_bytes = counter.to_be_bytes();
    let hmac = match config.algorithm {
        TotpAlgorithm::Sha1 => hmac_digest::<Hmac<Sha1>>(&config.seed, &counter_bytes)?,
        TotpAlgorithm::Sha256 => hmac_digest::<Hmac<Sha256>>(&config.seed, &counter_bytes)?,
        TotpAlgorithm::Sha512 => hmac_digest::<Hmac<Sha512>>(&config.seed, &counter_bytes)?,
    };

    let value = dynamic_truncate(&hmac)?;
    let modulus = 10_u32.pow(u32::from(config.digits));
    let code = value % modulus;
    Ok(format!(
        "{code:0width$}",
        width = usize::from(config.digits)
    ))
}

fn parse_algorithm(value: &str) -> Result<TotpAlgorithm, TotpError> {
    match value.to_ascii_uppercase().as_str() {
        "SHA1" => Ok(TotpAlgorithm::Sha1),
        "SHA256" => Ok(TotpAlgorithm::Sha256),
        "SHA512" => Ok(TotpAlgorithm::Sha512),
        _ => Err(TotpError::InvalidOtpUri(format!(
            "unsupported algorithm `{value}`"
        ))),
    }
}

fn hmac_digest<M: Mac + hmac::digest::KeyInit>(
    key: &[u8],
    message: &[u8],
) -> Result<Vec<u8>, TotpError> {
    let mut mac = <M as hmac::digest::KeyInit>::new_from_slice(key)
        .map_err(|_| TotpError::InvalidConfig("invalid seed length".to_owned()))?;
    mac.update(message);
    Ok(mac.finalize().into_bytes().to_vec())
}

fn dynamic_truncate(hmac: &[u8]) -> Result<u32, TotpError> {
    let offset = usize::from(
        *hmac
            .last()
            .ok_or_else(|| TotpError::InvalidConfig("empty HMAC output".to_owned()))?
            & 0x0f,
    );
    if hmac.len() < offset + 4 {
        return Err(TotpError::InvalidConfig(
            "HMAC output too short for dynamic truncation".to_owned(),
        ));
    }

    let b0 = u32::from(hmac[offset] & 0x7f);
    let b1 = u32::from(hmac[offset + 1]);
    let b2 = u32::from(hmac[offset + 2]);
    let b3 = u32::from(hmac[offset + 3]);
    Ok((b0 << 24) | (b1 << 16) | (b2 << 8) | b3)
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};
    use std::time::Duration;

    use super::*;

    // GEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQ == b"12345678901234567890"
    const RFC_URI: &str =
        "otpauth://totp/Example:alice?secret=GEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQ&digits=8";

    struct FakeClock {
        now: Cell<u64>,
        sleeps: RefCell<Vec<Duration>>,
    }

    impl FakeClock {
        fn at(now: u64) -> Self {
            Self {
                now: Cell::new(now),
                sleeps: RefCell::new(Vec::new()),
            }
        }
    }

    impl Clock for &FakeClock {
        fn unix_seconds(&self) -> u64 {
            self.now.get()
        }

        fn sleep(&self, duration: Duration) {
            self.sleeps.borrow_mut().push(duration);
            self.now.set(self.now.get() + duration.as_secs());
        }
    }

    #[test]
    fn matches_rfc6238_vectors() {
        let seed_sha1 = b"12345678901234567890".to_vec();
        let seed_sha256 = b"12345678901234567890123456789012".to_vec();
        let seed_sha512 =
            b"1234567890123456789012345678901234567890123456789012345678901234".to_vec();
        let vectors = [
            (59, "94287082", "46119246", "90693936"),
            (1_111_111_109, "07081804", "68084774", "25091201"),
            (1_234_567_890, "89005924", "91819424", "93441116"),
            (20_000_000_000, "65353130", "77737706", "47863826"),
        ];

        for (timestamp, sha1_code, sha256_code, sha512_code) in vectors {
            let config = |seed: &Vec<u8>, algorithm| TotpConfig {
                seed: seed.clone(),
                issuer: None,
                algorithm,
                digits: 8,
                period: 30,
            };

            assert_eq!(
                generate_totp(&config(&seed_sha1, TotpAlgorithm::Sha1), timestamp)
                    .expect("sha1 TOTP should generate"),
                sha1_code
            );
            assert_eq!(
                generate_totp(&config(&seed_sha256, TotpAlgorithm::Sha256), timestamp)
                    .expect("sha256 TOTP should generate"),
                sha256_code
            );
            assert_eq!(
                generate_totp(&config(&seed_sha512, TotpAlgorithm::Sha512), timestamp)
                    .expect("sha512 TOTP should generate"),
                sha512_code
            );
        }
    }

    #[test]
    fn parses_otpauth_uri_with_defaults() {
        let config = parse_otpauth_uri("otpauth://totp/Example?secret=JBSWY3DPEHPK3PXP")
            .expect("otpauth URI should parse");
        assert_eq!(config.period, DEFAULT_PERIOD);
        assert_eq!(config.digits, DEFAULT_DIGITS);
        assert_eq!(config.algorithm, TotpAlgorithm::Sha1);
        assert_eq!(config.issuer, None);
        assert_eq!(config.seed, b"Hello!\xde\xad\xbe\xef".to_vec());
    }

    #[test]
    fn parses_explicit_parameters() {
        let config = parse_otpauth_uri(
            "otpauth://totp/Example?secret=jbswy3dpehpk3pxp&issuer=pws&algorithm=sha256&digits=8&period=60",
        )
        .expect("otpauth URI should parse");
        assert_eq!(config.issuer.as_deref(), Some("pws"));
        assert_eq!(config.algorithm, TotpAlgorithm::Sha256);
        assert_eq!(config.digits, 8);
        assert_eq!(config.period, 60);
    }

    #[test]
    fn rejects_unusable_uris() {
        for uri in [
            "not a uri",
            "https://totp/Example?secret=JBSWY3DPEHPK3PXP",
            "otpauth://hotp/Example?secret=JBSWY3DPEHPK3PXP",
            "otpauth://totp/Example",
            "otpauth://totp/Example?secret=!!!",
            "otpauth://totp/Example?secret=JBSWY3DPEHPK3PXP&period=0",
            "otpauth://totp/Example?secret=JBSWY3DPEHPK3PXP&algorithm=MD5",
        ] {
            assert!(
                matches!(parse_otpauth_uri(uri), Err(TotpError::InvalidOtpUri(_))),
                "{uri} should be rejected"
            );
        }
    }

    #[test]
    fn window_arithmetic_uses_period_modulus() {
        let window = TotpWindow::at(30, 1_000_000_000);
        assert_eq!(window.elapsed, 10);
        assert_eq!(window.remaining, 20);

        let boundary = TotpWindow::at(30, 1_000_000_020);
        assert_eq!(boundary.elapsed, 0);
        assert_eq!(boundary.remaining, 30);
    }

    #[test]
    fn current_code_reports_remaining_seconds() {
        let clock = FakeClock::at(59);
        let deriver = TotpDeriver::new(&clock);
        let code = deriver
            .current_code(RFC_URI, false)
            .expect("code should derive");
        assert_eq!(code.code, "94287082");
        assert_eq!(code.remaining_seconds, 1);
        assert!(clock.sleeps.borrow().is_empty());
    }

    #[test]
    fn waits_for_a_fresh_window_when_close_to_expiry() {
        let clock = FakeClock::at(1_000_000_018);
        let deriver = TotpDeriver::new(&clock);
        let code = deriver
            .current_code(RFC_URI, true)
            .expect("code should derive");

        assert_eq!(*clock.sleeps.borrow(), vec![Duration::from_secs(3)]);
        assert_eq!(code.at, 1_000_000_021);
        assert_eq!(code.remaining_seconds, 29);
        let expected = generate_totp(
            &parse_otpauth_uri(RFC_URI).expect("parse"),
            1_000_000_021,
        )
        .expect("generate");
        assert_eq!(code.code, expected);
    }

    #[test]
    fn does_not_wait_with_enough_time_left() {
        let clock = FakeClock::at(1_000_000_017);
        let deriver = TotpDeriver::new(&clock);
        let code = deriver
            .current_code(RFC_URI, true)
            .expect("code should derive");
        assert!(clock.sleeps.borrow().is_empty());
        assert_eq!(code.remaining_seconds, 3);
    }

    #[test]
    fn invalid_uri_fails_before_any_wait() {
        let clock = FakeClock::at(1_000_000_019);
        let deriver = TotpDeriver::new(&clock);
        let result = deriver.current_code("otpauth://totp/Example", true);
        assert!(matches!(result, Err(TotpError::InvalidOtpUri(_))));
        assert!(clock.sleeps.borrow().is_empty());
    }
}
