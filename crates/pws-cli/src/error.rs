use pws_core::{BreachError, CodecError, GenerateError, NameError, TotpError};
use pws_storage::StorageError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CliExitCode {
    Success = 0,
    General = 1,
    Usage = 2,
    NotFound = 3,
    SecretLocked = 4,
    CorruptOrParse = 5,
    NetworkUnavailable = 6,
    PermissionDenied = 7,
    EncryptionFailed = 8,
}

#[derive(Debug)]
pub struct CliError {
    pub code: CliExitCode,
    pub kind: &'static str,
    pub message: String,
}

impl CliError {
    pub fn usage(message: impl Into<String>) -> Self {
        Self {
            code: CliExitCode::Usage,
            kind: "invalid_usage",
            message: message.into(),
        }
    }

    pub fn general(kind: &'static str, message: impl Into<String>) -> Self {
        Self {
            code: CliExitCode::General,
            kind,
            message: message.into(),
        }
    }
}

pub fn map_io_error(error: std::io::Error) -> CliError {
    let code = if error.kind() == std::io::ErrorKind::PermissionDenied {
        CliExitCode::PermissionDenied
    } else {
        CliExitCode::General
    };
    CliError {
        code,
        kind: "io_error",
        message: error.to_string(),
    }
}

pub fn map_storage_error(error: StorageError) -> CliError {
    match error {
        StorageError::NotFound(_) => CliError {
            code: CliExitCode::NotFound,
            kind: "secret_not_found",
            message: error.to_string(),
        },
        StorageError::Locked(_) => CliError {
            code: CliExitCode::SecretLocked,
            kind: "secret_locked",
            message: error.to_string(),
        },
        StorageError::MissingKeyId(_) => CliError {
            code: CliExitCode::General,
            kind: "missing_key_id",
            message: error.to_string(),
        },
        StorageError::WipeIncomplete { .. } => CliError {
            code: CliExitCode::General,
            kind: "wipe_incomplete",
            message: error.to_string(),
        },
        StorageError::Encryption(_) => CliError {
            code: CliExitCode::EncryptionFailed,
            kind: "encryption_failed",
            message: error.to_string(),
        },
        StorageError::InvalidPlaintext(_) => CliError {
            code: CliExitCode::CorruptOrParse,
            kind: "invalid_plaintext",
            message: error.to_string(),
        },
        StorageError::Codec(error) => map_codec_error(error),
        StorageError::Io(error) => map_io_error(error),
    }
}

pub fn map_codec_error(error: CodecError) -> CliError {
    match error {
        CodecError::EmptyPassword | CodecError::PasswordIsOtp => CliError {
            code: CliExitCode::CorruptOrParse,
            kind: "no_password",
            message: error.to_string(),
        },
        CodecError::MultilinePassword => CliError::usage(error.to_string()),
    }
}

pub fn map_name_error(error: NameError) -> CliError {
    CliError {
        code: CliExitCode::Usage,
        kind: "invalid_secret_name",
        message: error.to_string(),
    }
}

pub fn map_generate_error(error: GenerateError) -> CliError {
    match error {
        GenerateError::InvalidLength => CliError::usage(error.to_string()),
        GenerateError::RandomSource(_) => CliError::general("random_failed", error.to_string()),
    }
}

pub fn map_totp_error(error: TotpError) -> CliError {
    CliError {
        code: CliExitCode::CorruptOrParse,
        kind: "invalid_otp_uri",
        message: error.to_string(),
    }
}

pub fn map_breach_error(error: BreachError) -> CliError {
    match error {
        BreachError::CorpusUnavailable(_) => CliError {
            code: CliExitCode::NetworkUnavailable,
            kind: "corpus_unavailable",
            message: error.to_string(),
        },
        BreachError::CorpusResponseMalformed(_) => CliError {
            code: CliExitCode::CorruptOrParse,
            kind: "corpus_response_malformed",
            message: error.to_string(),
        },
    }
}
