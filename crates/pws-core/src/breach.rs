//! k-anonymous lookup of a password against a breach corpus.
//!
//! Only the first [`PREFIX_LEN`] hex characters of the password's SHA-1
//! digest ever leave the process; the returned suffix list is scanned
//! locally.

use std::time::Duration;

use data_encoding::HEXUPPER;
use sha1::{Digest, Sha1};
use thiserror::Error;

pub const DEFAULT_ENDPOINT: &str = "https://api.pwnedpasswords.com";
pub const PREFIX_LEN: usize = 5;

#[derive(Debug, Error)]
pub enum BreachError {
    #[error("breach corpus unavailable: {0}")]
    CorpusUnavailable(String),
    #[error("malformed breach corpus response line `{0}`")]
    CorpusResponseMalformed(String),
}

/// Uppercase SHA-1 hex digest of a candidate password.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreachQuery {
    hash: String,
}

impl BreachQuery {
    #[must_use]
    pub fn new(password: &str) -> Self {
        let digest = Sha1::digest(password.as_bytes());
        Self {
            hash: HEXUPPER.encode(digest.as_slice()),
        }
    }

    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.hash[..PREFIX_LEN]
    }

    #[must_use]
    pub fn suffix(&self) -> &str {
        &self.hash[PREFIX_LEN..]
    }

    /// Scans a `SUFFIX:COUNT` range response for this digest. Entries with a
    /// zero count are padding and never match.
    pub fn matches_response(&self, body: &str) -> Result<bool, BreachError> {
        for line in body.split('\n') {
            let line = line.trim_end_matches('\r');
            if line.is_empty() {
                continue;
            }

            let parts: Vec<&str> = line.split(':').collect();
            let [suffix, count] = parts.as_slice() else {
                return Err(BreachError::CorpusResponseMalformed(line.to_owned()));
            };
            if count.trim() == "0" {
                continue;
            }

            let candidate = format!("{}{}", self.prefix(), suffix.trim().to_ascii_uppercase());
            if candidate == self.hash {
                return Ok(true);
            }
        }

        Ok(false)
    }
}

/// Fetches the raw suffix list registered under a hash prefix.
pub trait RangeSource {
    fn fetch_range(&self, prefix: &str) -> Result<String, BreachError>;
}

pub struct HttpRangeSource {
    client: reqwest::blocking::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpRangeSource {
    /// `timeout` of `None` keeps the HTTP client's default behaviour.
    pub fn new(
        endpoint: &str,
        api_key: Option<String>,
        timeout: Option<Duration>,
    ) -> Result<Self, BreachError> {
        let mut builder = reqwest::blocking::Client::builder()
            .user_agent(concat!("pws/", env!("CARGO_PKG_VERSION")));
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|error| BreachError::CorpusUnavailable(error.to_string()))?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_owned(),
            api_key: api_key.filter(|key| !key.trim().is_empty()),
        })
    }

    #[must_use]
    pub fn range_url(&self, prefix: &str) -> String {
        format!("{}/range/{prefix}", self.endpoint)
    }
}

impl RangeSource for HttpRangeSource {
    fn fetch_range(&self, prefix: &str) -> Result<String, BreachError> {
        let mut request = self
            .client
            .get(self.range_url(prefix))
            .header("Add-Padding", "true");
        if let Some(api_key) = &self.api_key {
            request = request.header("hibp-api-key", api_key);
        }

        let response = request
            .send()
            .map_err(|error| BreachError::CorpusUnavailable(error.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(BreachError::CorpusUnavailable(format!(
                "corpus responded with status {status}"
            )));
        }

        response
            .text()
            .map_err(|error| BreachError::CorpusUnavailable(error.to_string()))
    }
}

pub struct BreachChecker<S> {
    source: S,
}

impl<S: RangeSource> BreachChecker<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }

    pub fn check(&self, password: &str) -> Result<bool, BreachError> {
        let query = BreachQuery::new(password);
        let body = self.source.fetch_range(query.prefix())?;
        query.matches_response(&body)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;

    // SHA-1("password") = 5BAA61E4C9B93F3F0682250B6CF8331B7EE68FD8
    const PASSWORD_SUFFIX: &str = "1E4C9B93F3F0682250B6CF8331B7EE68FD8";

    struct CannedSource {
        body: Result<String, String>,
        requested: RefCell<Vec<String>>,
    }

    impl CannedSource {
        fn returning(body: &str) -> Self {
            Self {
                body: Ok(body.to_owned()),
                requested: RefCell::new(Vec::new()),
            }
        }
    }

    impl RangeSource for &CannedSource {
        fn fetch_range(&self, prefix: &str) -> Result<String, BreachError> {
            self.requested.borrow_mut().push(prefix.to_owned());
            self.body
                .clone()
                .map_err(BreachError::CorpusUnavailable)
        }
    }

    #[test]
    fn splits_digest_into_prefix_and_suffix() {
        let query = BreachQuery::new("password");
        assert_eq!(query.prefix(), "5BAA6");
        assert_eq!(query.suffix(), PASSWORD_SUFFIX);
    }

    #[test]
    fn finds_breached_password_in_range() {
        let body = format!(
            "0018A45C4D1DEF81644B54AB7F969B88D65:1\r\n{PASSWORD_SUFFIX}:9545824\r\n00D4F6E8FA6EECAD2A3AA415EEC418D38EC:2"
        );
        let source = CannedSource::returning(&body);
        let checker = BreachChecker::new(&source);
        assert!(checker.check("password").expect("check should succeed"));
    }

    #[test]
    fn suffix_comparison_ignores_case() {
        let body = format!("{}:3", PASSWORD_SUFFIX.to_ascii_lowercase());
        let source = CannedSource::returning(&body);
        assert!(BreachChecker::new(&source).check("password").expect("check"));
    }

    #[test]
    fn zero_count_padding_entries_never_match() {
        let body = format!("{PASSWORD_SUFFIX}:0\n");
        let source = CannedSource::returning(&body);
        assert!(!BreachChecker::new(&source).check("password").expect("check"));
    }

    #[test]
    fn unknown_password_is_not_breached() {
        let source = CannedSource::returning("0018A45C4D1DEF81644B54AB7F969B88D65:1\n");
        assert!(!BreachChecker::new(&source).check("password").expect("check"));
    }

    #[test]
    fn only_the_hash_prefix_is_sent() {
        let source = CannedSource::returning("");
        let password = "correct horse battery staple";
        BreachChecker::new(&source).check(password).expect("check");

        let query = BreachQuery::new(password);
        let requested = source.requested.borrow();
        assert_eq!(requested.as_slice(), [query.prefix().to_owned()]);
        assert!(requested.iter().all(|prefix| prefix.len() == PREFIX_LEN));
        assert!(!requested.iter().any(|prefix| prefix.contains(query.suffix())));
    }

    #[test]
    fn range_url_carries_only_the_prefix() {
        let source = HttpRangeSource::new("https://corpus.invalid/", None, None)
            .expect("client should build");
        let query = BreachQuery::new("password");
        let url = source.range_url(query.prefix());
        assert_eq!(url, "https://corpus.invalid/range/5BAA6");
        assert!(!url.contains(query.suffix()));
    }

    #[test]
    fn malformed_lines_are_rejected() {
        let source = CannedSource::returning("ABCDEF\n");
        let result = BreachChecker::new(&source).check("password");
        assert!(matches!(result, Err(BreachError::CorpusResponseMalformed(_))));

        let source = CannedSource::returning("AB:CD:EF\n");
        let result = BreachChecker::new(&source).check("password");
        assert!(matches!(result, Err(BreachError::CorpusResponseMalformed(_))));
    }

    #[test]
    fn transport_failure_surfaces_as_unavailable() {
        let source = CannedSource {
            body: Err("connection refused".to_owned()),
            requested: RefCell::new(Vec::new()),
        };
        let result = BreachChecker::new(&source).check("password");
        assert!(matches!(result, Err(BreachError::CorpusUnavailable(_))));
    }
}
