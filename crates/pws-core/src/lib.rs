pub mod breach;
pub mod model;
pub mod password;
pub mod totp;

pub const APP_NAME: &str = "pws";

/// File suffix of every encrypted secret on disk.
pub const SECRET_SUFFIX: &str = ".gpg";

/// Marker file naming the encryption recipient for a directory subtree.
pub const KEY_ID_FILE: &str = ".gpg-id";

/// Prefix of a body line that carries a TOTP key URI.
pub const OTP_URI_PREFIX: &str = "otpauth://totp";

pub use breach::{
    BreachChecker, BreachError, BreachQuery, DEFAULT_ENDPOINT, HttpRangeSource, RangeSource,
};
pub use model::{CodecError, NameError, Pair, SecretName, SecretRecord, set_password};
pub use password::{DEFAULT_LENGTH, GenerateError, GenerationPolicy, generate_password};
pub use totp::{
    Clock, SystemClock, TotpAlgorithm, TotpCode, TotpConfig, TotpDeriver, TotpError, TotpWindow,
    generate_totp, parse_otpauth_uri,
};
