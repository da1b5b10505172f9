//! Crate-level error types shared across the cipher, stores, adapters, and manager.

// self
use crate::{
	_prelude::*,
	auth::ConnectionId,
	connection::Provider,
	provider::FailureClass,
};

/// Crate-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Canonical error exposed by public APIs.
#[derive(Debug, ThisError)]
pub enum Error {
	/// Storage-layer failure.
	#[error("{0}")]
	Storage(
		#[from]
		#[source]
		crate::store::StoreError,
	),
	/// Provider or local configuration problem; never retried and never recorded on a
	/// connection.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Stored ciphertext cannot be opened; the connection needs re-authorization.
	#[error(transparent)]
	Decryption(#[from] DecryptionError),
	/// Temporary provider failure; the caller may retry later.
	#[error(transparent)]
	Transient(#[from] TransientError),
	/// Provider rejected the credential for good; automatic refresh must stop.
	#[error(transparent)]
	Terminal(#[from] TerminalError),

	/// No connection exists for the identifier.
	#[error("Connection `{id}` does not exist.")]
	NotFound {
		/// Identifier that was looked up.
		id: ConnectionId,
	},
	/// Connection was soft-deleted and is excluded from every operation.
	#[error("Connection `{id}` has been revoked.")]
	Revoked {
		/// Identifier of the revoked connection.
		id: ConnectionId,
	},
	/// No adapter is registered for the connection's provider.
	#[error("No adapter is registered for provider `{provider}`.")]
	NoAdapter {
		/// Provider without a registered adapter.
		provider: Provider,
	},
	/// Conditional writes kept losing against concurrent writers.
	#[error("Connection `{id}` kept changing during a conditional update.")]
	Contended {
		/// Identifier of the contended connection.
		id: ConnectionId,
	},
}
impl Error {
	/// Returns `true` when the error is safe to retry later without human involvement.
	pub fn is_transient(&self) -> bool {
		matches!(self, Self::Transient(_) | Self::Contended { .. })
	}

	/// Returns `true` when the connection can only recover through re-authorization.
	pub fn requires_reauth(&self) -> bool {
		matches!(self, Self::Terminal(_) | Self::Decryption(_))
	}
}

/// Configuration failures, including provider misconfiguration.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: BoxError,
	},
	/// HTTP request construction failed.
	#[error(transparent)]
	HttpRequest(#[from] oauth2::http::Error),
	/// A required setting is absent.
	#[error("Required setting `{name}` is missing.")]
	MissingSetting {
		/// Setting or environment variable name.
		name: &'static str,
	},
	/// A setting is present but cannot be parsed.
	#[error("Setting `{name}` is invalid: {reason}.")]
	InvalidSetting {
		/// Setting or environment variable name.
		name: &'static str,
		/// Parser-supplied reason.
		reason: String,
	},
	/// Provider credentials (client id, secret, developer token) are not configured.
	#[error("Provider `{provider}` is missing its `{credential}` credential.")]
	MissingCredential {
		/// Provider lacking the credential.
		provider: Provider,
		/// Credential label.
		credential: &'static str,
	},
	/// Provider rejected the configured client credentials.
	#[error("Provider `{provider}` rejected the client credentials: {reason}.")]
	InvalidClient {
		/// Provider that rejected the client.
		provider: Provider,
		/// Provider-supplied reason.
		reason: String,
	},
	/// Provider descriptor contains an invalid URL.
	#[error("Descriptor contains an invalid URL.")]
	InvalidDescriptor {
		/// Underlying parsing failure.
		#[source]
		source: oauth2::url::ParseError,
	},
	/// Encryption secret is unusable.
	#[error("Encryption secret must not be empty.")]
	EmptySecret,
	/// Sealing a token failed.
	#[error("Token encryption failed.")]
	Encryption,
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::HttpClientBuild { source: Box::new(src) }
	}
}
impl From<ReqwestError> for ConfigError {
	fn from(e: ReqwestError) -> Self {
		Self::http_client_build(e)
	}
}

/// Raised when a sealed token cannot be opened.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum DecryptionError {
	/// Blob is empty.
	#[error("Sealed token is empty.")]
	Empty,
	/// Blob does not follow the sealed layout (unknown version or truncated).
	#[error("Sealed token has an unsupported layout.")]
	Malformed,
	/// Authentication tag check failed (tampered data or a different key).
	#[error("Sealed token failed authentication.")]
	Authentication,
	/// Plaintext is not valid UTF-8.
	#[error("Sealed token does not contain UTF-8 text.")]
	Encoding,
}

/// Temporary refresh failure (safe to retry).
#[derive(Debug, ThisError)]
#[error("Token refresh failed temporarily ({class}): {message}.")]
pub struct TransientError {
	/// Transient class (network, quota exceeded, or unknown).
	pub class: FailureClass,
	/// Provider- or transport-supplied message.
	pub message: String,
	/// HTTP status code, when available.
	pub status: Option<u16>,
	/// Retry-After hint from upstream, if supplied.
	pub retry_after: Option<Duration>,
}
impl TransientError {
	/// Creates a transient error without HTTP metadata.
	pub fn new(class: FailureClass, message: impl Into<String>) -> Self {
		Self { class, message: message.into(), status: None, retry_after: None }
	}

	/// Wraps a transport failure as a network-class error.
	pub fn network(src: impl Display) -> Self {
		Self::new(FailureClass::Network, src.to_string())
	}
}

/// Refresh failure that will never succeed without re-authorization.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
#[error("Token refresh failed permanently ({class}): {reason}.")]
pub struct TerminalError {
	/// Terminal class (invalid grant or revoked by provider).
	pub class: FailureClass,
	/// Provider- or crate-supplied reason.
	pub reason: String,
}
impl TerminalError {
	/// Shorthand for an `invalid_grant` classification.
	pub fn invalid_grant(reason: impl Into<String>) -> Self {
		Self { class: FailureClass::InvalidGrant, reason: reason.into() }
	}
}
