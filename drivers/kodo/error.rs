//! Kodo driver errors / Kodo驱动错误

use std::sync::Arc;
use thiserror::Error;

use crate::storage::{ContextError, ErrorCode};

/// Kodo "no such file or directory"
pub const CODE_NO_SUCH_ENTRY: u16 = 612;
/// Kodo "file exists"
pub const CODE_ENTRY_EXISTS: u16 = 614;
/// Kodo "no such bucket"
pub const CODE_NO_SUCH_BUCKET: u16 = 631;

#[derive(Debug, Clone, Error)]
pub enum KodoError {
    #[error("no accessKey provided")]
    NoAccessKey,
    #[error("no secretKey provided")]
    NoSecretKey,
    #[error("no downloadDomain provided")]
    NoDownloadDomain,
    #[error("kodoblob: does not support SignedURL for PUT")]
    NotSupportedSignedPutUrl,
    #[error("kodoblob: does not support SignedURL for DELETE")]
    NotSupportedSignedDeleteUrl,
    #[error("unsupported Method {0:?}")]
    UnsupportedMethod(String),
    #[error("kodoblob: unexpected status code {0}")]
    StatusCode(u16),
    #[error("kodoblob: api error {code}: {message}")]
    Api { code: u16, message: String },
    #[error("kodoblob: invalid url {0:?}")]
    InvalidUrl(String),
    #[error("kodoblob: writer already closed")]
    WriterClosed,
    #[error("kodoblob: upload failed: {0}")]
    Upload(Arc<anyhow::Error>),
}

impl KodoError {
    /// HTTP or service status carried by the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            KodoError::StatusCode(code) | KodoError::Api { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// Map any driver error onto a portable [`ErrorCode`].
pub fn error_code(err: &anyhow::Error) -> ErrorCode {
    if let Some(ctx_err) = err.downcast_ref::<ContextError>() {
        return match ctx_err {
            ContextError::Canceled => ErrorCode::Canceled,
            ContextError::DeadlineExceeded => ErrorCode::DeadlineExceeded,
        };
    }
    let Some(kodo_err) = err.downcast_ref::<KodoError>() else {
        return ErrorCode::Unknown;
    };
    match kodo_err {
        KodoError::NoAccessKey | KodoError::NoSecretKey | KodoError::InvalidUrl(_) => {
            ErrorCode::InvalidArgument
        }
        KodoError::NoDownloadDomain => ErrorCode::FailedPrecondition,
        KodoError::NotSupportedSignedPutUrl
        | KodoError::NotSupportedSignedDeleteUrl
        | KodoError::UnsupportedMethod(_) => ErrorCode::Unimplemented,
        KodoError::WriterClosed => ErrorCode::FailedPrecondition,
        KodoError::Upload(inner) => error_code(inner),
        KodoError::StatusCode(code) | KodoError::Api { code, .. } => match *code {
            404 | CODE_NO_SUCH_ENTRY | CODE_NO_SUCH_BUCKET => ErrorCode::NotFound,
            CODE_ENTRY_EXISTS => ErrorCode::AlreadyExists,
            400 => ErrorCode::InvalidArgument,
            401 | 403 => ErrorCode::PermissionDenied,
            _ => ErrorCode::Unknown,
        },
    }
}
