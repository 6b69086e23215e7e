//! The crate-wide error type.
//!
//! Every fallible operation in Gordon returns [`GordonResult`]. Validation
//! errors at an HTTP boundary carry enough information to render the right
//! registry-v2 or admin JSON error body; everything else is either a typed
//! variant or falls through [`AnyError`].

use std::{
    error::Error,
    fmt::{self, Display},
};

use thiserror::Error;

use crate::registry::digest::DigestParseError;

/// The result of a Gordon operation.
pub type GordonResult<T> = Result<T, GordonError>;

/// An error kind from §7 of the specification, used to pick the registry-v2
/// error code and/or HTTP status at the response boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid repository name.
    NameInvalid,
    /// Invalid tag/reference.
    TagInvalid,
    /// Invalid or mismatched digest.
    DigestInvalid,
    /// Malformed upload stream.
    BlobUploadInvalid,
    /// Upload session uuid does not exist.
    UploadUnknown,
    /// Manifest body failed validation.
    ManifestInvalid,
    /// No such manifest.
    ManifestUnknown,
    /// No such blob.
    BlobUnknown,
    /// A size limit (manifest or chunk) was exceeded.
    SizeInvalid,
    /// Rate limit exceeded.
    TooManyRequests,
    /// Missing or invalid credentials.
    Unauthorized,
    /// Valid credentials, insufficient scope.
    Forbidden,
    /// Resource does not exist.
    NotFound,
    /// Conflicting state (e.g. route already exists).
    Conflict,
    /// Unclassified internal error.
    Internal,
    /// The container engine could not be reached.
    EngineUnavailable,
    /// Image pull failed permanently.
    ImagePullFailed,
    /// A deploy did not reach `healthy` within the readiness timeout.
    DeployTimeout,
}

impl ErrorKind {
    /// The registry v2 error code string (`{"errors":[{"code": ...}]}`).
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::NameInvalid => "NAME_INVALID",
            ErrorKind::TagInvalid => "TAG_INVALID",
            ErrorKind::DigestInvalid => "DIGEST_INVALID",
            ErrorKind::BlobUploadInvalid => "BLOB_UPLOAD_INVALID",
            ErrorKind::UploadUnknown => "UPLOAD_UNKNOWN",
            ErrorKind::ManifestInvalid => "MANIFEST_INVALID",
            ErrorKind::ManifestUnknown => "MANIFEST_UNKNOWN",
            ErrorKind::BlobUnknown => "BLOB_UNKNOWN",
            ErrorKind::SizeInvalid => "SIZE_INVALID",
            ErrorKind::TooManyRequests => "TOOMANYREQUESTS",
            ErrorKind::Unauthorized => "UNAUTHORIZED",
            ErrorKind::Forbidden => "FORBIDDEN",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::Conflict => "CONFLICT",
            ErrorKind::Internal => "INTERNAL",
            ErrorKind::EngineUnavailable => "ENGINE_UNAVAILABLE",
            ErrorKind::ImagePullFailed => "IMAGE_PULL_FAILED",
            ErrorKind::DeployTimeout => "DEPLOY_TIMEOUT",
        }
    }
}

/// An error that occurred somewhere in the Gordon core.
#[derive(pretty_error_debug::Debug, Error)]
pub enum GordonError {
    /// An I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A JSON (de)serialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A TOML parse error.
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// An HTTP request to the container engine or a remote control plane
    /// failed.
    #[error("http request error: {0}")]
    HttpRequest(#[from] reqwest::Error),

    /// An HTTP middleware (retry policy) error.
    #[error("http middleware error: {0}")]
    HttpMiddleware(#[from] reqwest_middleware::Error),

    /// A background task panicked or was cancelled.
    #[error("join error: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// A digest string failed to parse.
    #[error("invalid digest: {0}")]
    Digest(#[from] DigestParseError),

    /// A repository name failed validation.
    #[error("invalid repository name: {0}")]
    NameInvalid(String),

    /// A tag/reference failed validation.
    #[error("invalid reference: {0}")]
    TagInvalid(String),

    /// An uploaded chunk's running hash does not match the asserted digest.
    #[error("digest mismatch: expected {expected}, computed {computed}")]
    DigestMismatch {
        /// The digest the client asserted.
        expected: String,
        /// The digest Gordon actually computed.
        computed: String,
    },

    /// The upload stream could not be appended (bad range, write failure).
    #[error("invalid upload stream: {0}")]
    BlobUploadInvalid(String),

    /// No upload session exists for the given uuid.
    #[error("unknown upload session: {0}")]
    UploadUnknown(uuid::Uuid),

    /// The manifest body is not valid JSON or references missing fields.
    #[error("invalid manifest: {0}")]
    ManifestInvalid(String),

    /// No manifest exists for `(name, reference)`.
    #[error("manifest unknown: {0}/{1}")]
    ManifestUnknown(String, String),

    /// No blob exists for the given digest.
    #[error("blob unknown: {0}")]
    BlobUnknown(String),

    /// A manifest or chunk exceeded its configured size limit.
    #[error("size limit exceeded: {0}")]
    SizeInvalid(String),

    /// The rate limiter rejected the request.
    #[error("too many requests")]
    TooManyRequests,

    /// Missing or invalid credentials.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Valid credentials, insufficient scope.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// The requested resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The requested mutation conflicts with existing state.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A configuration file failed validation.
    #[error("configuration validation error: {0}")]
    ConfigValidation(String),

    /// A configuration file failed validation with multiple errors.
    #[error("configuration validation errors: {0:?}")]
    ConfigValidationErrors(Vec<String>),

    /// The configuration file was not found at the given path.
    #[error("configuration file not found: {0}")]
    ConfigNotFound(String),

    /// The container engine could not be reached after exhausting retries.
    #[error("container engine unavailable: {0}")]
    EngineUnavailable(String),

    /// Pulling an image failed permanently (not found, auth, or exhausted
    /// retries on a transient failure).
    #[error("image pull failed: {0}")]
    ImagePullFailed(String),

    /// A deploy did not become healthy within the readiness timeout.
    #[error("deploy timed out waiting for health: {0}")]
    DeployTimeout(String),

    /// No route exists for the given domain.
    #[error("no route for domain: {0}")]
    RouteNotFound(String),

    /// An attachment was declared on the default bridge network.
    #[error("attachments require a non-default network, got: {0}")]
    AttachmentRequiresNetwork(String),

    /// The in-process control plane was asked to run while `auth.enabled`
    /// is set; only the remote client may be used in that configuration.
    #[error("in-process control plane refused: auth.enabled=true requires the remote client")]
    InProcessControlPlaneRefused,

    /// A JWT could not be encoded, decoded, or validated.
    #[error("token error: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),

    /// A password hash could not be verified.
    #[error("password hashing error: {0}")]
    PasswordHash(#[from] bcrypt::BcryptError),

    /// A catch-all for errors that don't warrant their own variant.
    #[error(transparent)]
    Custom(#[from] AnyError),
}

impl GordonError {
    /// Wraps an arbitrary error in the [`GordonError::Custom`] variant.
    pub fn custom(error: impl Into<anyhow::Error>) -> GordonError {
        GordonError::Custom(AnyError {
            error: error.into(),
        })
    }

    /// The [`ErrorKind`] used to pick the registry-v2 code / HTTP status.
    pub fn kind(&self) -> ErrorKind {
        match self {
            GordonError::NameInvalid(_) => ErrorKind::NameInvalid,
            GordonError::TagInvalid(_) => ErrorKind::TagInvalid,
            GordonError::Digest(_) | GordonError::DigestMismatch { .. } => ErrorKind::DigestInvalid,
            GordonError::BlobUploadInvalid(_) => ErrorKind::BlobUploadInvalid,
            GordonError::UploadUnknown(_) => ErrorKind::UploadUnknown,
            GordonError::ManifestInvalid(_) => ErrorKind::ManifestInvalid,
            GordonError::ManifestUnknown(..) => ErrorKind::ManifestUnknown,
            GordonError::BlobUnknown(_) => ErrorKind::BlobUnknown,
            GordonError::SizeInvalid(_) => ErrorKind::SizeInvalid,
            GordonError::TooManyRequests => ErrorKind::TooManyRequests,
            GordonError::Unauthorized(_) => ErrorKind::Unauthorized,
            GordonError::Forbidden(_) | GordonError::InProcessControlPlaneRefused => {
                ErrorKind::Forbidden
            }
            GordonError::NotFound(_) | GordonError::RouteNotFound(_) => ErrorKind::NotFound,
            GordonError::Conflict(_) => ErrorKind::Conflict,
            GordonError::EngineUnavailable(_) => ErrorKind::EngineUnavailable,
            GordonError::ImagePullFailed(_) => ErrorKind::ImagePullFailed,
            GordonError::DeployTimeout(_) => ErrorKind::DeployTimeout,
            _ => ErrorKind::Internal,
        }
    }
}

/// An error that can wrap any other error. Used when a dependency's error
/// type doesn't deserve a dedicated variant.
#[derive(Debug)]
pub struct AnyError {
    error: anyhow::Error,
}

impl AnyError {
    /// Downcasts the wrapped error to `T`, if it holds one.
    pub fn downcast<T>(&self) -> Option<&T>
    where
        T: Display + fmt::Debug + Send + Sync + 'static,
    {
        self.error.downcast_ref::<T>()
    }
}

impl Display for AnyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)
    }
}

impl Error for AnyError {}

impl PartialEq for AnyError {
    fn eq(&self, other: &Self) -> bool {
        self.error.to_string() == other.error.to_string()
    }
}

/// Creates an `Ok` [`GordonResult`]. Shadows the prelude's `Ok` so call
/// sites read `gordon::error::Ok(x)` unambiguously when both are in scope.
#[allow(non_snake_case)]
pub fn Ok<T>(value: T) -> GordonResult<T> {
    Result::Ok(value)
}
