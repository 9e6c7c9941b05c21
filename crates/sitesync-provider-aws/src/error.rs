// Mapping of AWS SDK failures onto the core error taxonomy
//
// The engine decides whether to retry from `BackendErrorKind` alone, so the
// classification here is the only place where AWS error codes are interpreted.

use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use sitesync_core::{BackendErrorKind, Error};

/// Service codes worth another attempt
const TRANSIENT_CODES: &[&str] = &[
    "Throttling",
    "ThrottlingException",
    "TooManyRequests",
    "TooManyRequestsException",
    "RequestLimitExceeded",
    "RequestTimeout",
    "SlowDown",
    "InternalError",
    "ServiceUnavailable",
    "OperationAborted",
    "TooManyInvalidationsInProgress",
    // Distribution still deploying after being disabled
    "DistributionNotDisabled",
    // ETag raced with a concurrent configuration change
    "PreconditionFailed",
];

/// Service codes caused by credentials or permissions
const AUTH_CODES: &[&str] = &[
    "AccessDenied",
    "InvalidAccessKeyId",
    "SignatureDoesNotMatch",
    "ExpiredToken",
    "InvalidClientTokenId",
    "UnrecognizedClientException",
];

/// Classify a service error from its code and HTTP status
pub(crate) fn classify_service_error(code: Option<&str>, status: Option<u16>) -> BackendErrorKind {
    if let Some(code) = code {
        if TRANSIENT_CODES.contains(&code) {
            return BackendErrorKind::Transient;
        }
        if AUTH_CODES.contains(&code) {
            return BackendErrorKind::Auth;
        }
        if code.starts_with("NoSuch") || code == "NotFound" {
            return BackendErrorKind::NotFound;
        }
    }

    match status {
        Some(429) | Some(500..=599) => BackendErrorKind::Transient,
        Some(401) | Some(403) => BackendErrorKind::Auth,
        Some(404) => BackendErrorKind::NotFound,
        _ => BackendErrorKind::Rejected,
    }
}

/// Convert an SDK failure into a backend error
///
/// Timeouts, dispatch failures and unparseable responses are transient.
/// Service errors are classified by code, then by status.
pub(crate) fn sdk_error<E>(backend: &'static str, operation: &str, err: SdkError<E, HttpResponse>) -> Error
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
{
    let kind = match &err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            BackendErrorKind::Transient
        }
        SdkError::ServiceError(service) => classify_service_error(
            service.err().code(),
            Some(service.raw().status().as_u16()),
        ),
        _ => BackendErrorKind::Rejected,
    };

    Error::backend(
        backend,
        kind,
        format!("{} failed: {}", operation, DisplayErrorContext(&err)),
    )
}

/// Convert a request builder failure (missing required field)
pub(crate) fn build_error(what: &str, err: impl std::fmt::Display) -> Error {
    Error::config(format!("Invalid {}: {}", what, err))
}
