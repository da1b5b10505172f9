//! Provider strategies that classify token-endpoint failures.
//!
//! Adapters collect what they know about a failed refresh into a [`ProviderErrorContext`]
//! (status code, OAuth or Graph error fields, body preview) and hand it to a
//! [`ProviderStrategy`]. The resulting [`ProviderErrorKind`] decides whether the failure is
//! terminal, transient, or a configuration problem.

// self
use crate::{
	_prelude::*,
	connection::Provider,
	error::{ConfigError, TerminalError, TransientError},
	provider::FailureClass,
};

/// Strategy hook that maps failed token requests into [`ProviderErrorKind`] values.
pub trait ProviderStrategy: Send + Sync {
	/// Classifies a failed token request.
	fn classify_token_error(&self, ctx: &ProviderErrorContext) -> ProviderErrorKind;
}

/// Canonical provider error categories produced by strategies.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProviderErrorKind {
	/// Classified refresh failure.
	Failure(FailureClass),
	/// Provider rejected the configured client credentials.
	InvalidClient,
}
impl ProviderErrorKind {
	/// Converts the classification into the crate error taxonomy.
	pub fn into_error(self, provider: Provider, ctx: &ProviderErrorContext) -> Error {
		let message = ctx.summary();

		match self {
			Self::InvalidClient => ConfigError::InvalidClient { provider, reason: message }.into(),
			Self::Failure(class) if class.is_terminal() =>
				TerminalError { class, reason: message }.into(),
			Self::Failure(class) => TransientError {
				class,
				message,
				status: ctx.http_status,
				retry_after: ctx.retry_after,
			}
			.into(),
		}
	}
}

/// Context passed to provider strategies when classifying token errors.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProviderErrorContext {
	/// HTTP status code returned by the provider, when available.
	pub http_status: Option<u16>,
	/// Retry-After hint returned by the provider.
	pub retry_after: Option<Duration>,
	/// Provider-supplied OAuth `error` field.
	pub oauth_error: Option<String>,
	/// Provider-supplied OAuth `error_description` (or Graph `message`) field.
	pub error_description: Option<String>,
	/// Graph API `code`.
	pub graph_code: Option<i64>,
	/// Graph API `error_subcode`.
	pub graph_subcode: Option<i64>,
	/// Preview of the response body for unparseable payloads.
	pub body_preview: Option<String>,
	/// Indicates whether the failure originated from the network/transport layer.
	pub network_error: bool,
}
impl ProviderErrorContext {
	const BODY_PREVIEW_LIMIT: usize = 256;

	/// Creates an empty context.
	pub fn new() -> Self {
		Self::default()
	}

	/// Convenience constructor for transport-level failures.
	pub fn network_failure(message: impl Into<String>) -> Self {
		Self { network_error: true, error_description: Some(message.into()), ..Default::default() }
	}

	/// Adds an HTTP status code (e.g., 400, 429, 503).
	pub fn with_http_status(mut self, status: u16) -> Self {
		self.http_status = Some(status);

		self
	}

	/// Adds a Retry-After hint.
	pub fn with_retry_after(mut self, retry_after: Option<Duration>) -> Self {
		self.retry_after = retry_after;

		self
	}

	/// Adds the OAuth error code string returned by the provider.
	pub fn with_oauth_error(mut self, error: impl Into<String>) -> Self {
		self.oauth_error = Some(error.into());

		self
	}

	/// Adds the OAuth `error_description` field.
	pub fn with_error_description(mut self, description: impl Into<String>) -> Self {
		self.error_description = Some(description.into());

		self
	}

	/// Adds Graph API error codes.
	pub fn with_graph_codes(mut self, code: Option<i64>, subcode: Option<i64>) -> Self {
		self.graph_code = code;
		self.graph_subcode = subcode;

		self
	}

	/// Adds a body preview for payloads that could not be parsed.
	pub fn with_body_preview(mut self, body: impl Into<String>) -> Self {
		self.body_preview = Some(truncate_preview(body.into()));

		self
	}

	/// Human-readable summary used as the failure message.
	pub fn summary(&self) -> String {
		let detail = self
			.error_description
			.as_deref()
			.or(self.oauth_error.as_deref())
			.or(self.body_preview.as_deref())
			.unwrap_or("no details");

		match (self.graph_code, self.http_status) {
			(Some(code), _) => format!("{detail} (code {code})"),
			(None, Some(status)) => format!("{detail} (HTTP {status})"),
			(None, None) => detail.to_owned(),
		}
	}
}

/// Strategy for Google's OAuth token endpoint (shared by GA4 and Google Ads).
///
/// It prioritizes structured OAuth fields (`error`, `error_description`), then falls back to
/// body text hints, and finally the HTTP status code. Network failures are always
/// [`FailureClass::Network`].
#[derive(Debug, Default)]
pub struct GoogleStrategy;
impl ProviderStrategy for GoogleStrategy {
	fn classify_token_error(&self, ctx: &ProviderErrorContext) -> ProviderErrorKind {
		if ctx.network_error {
			return ProviderErrorKind::Failure(FailureClass::Network);
		}

		ctx.oauth_error
			.as_deref()
			.and_then(match_oauth_error)
			.or_else(|| classify_text(ctx.error_description.as_deref()))
			.or_else(|| classify_text(ctx.body_preview.as_deref()))
			.unwrap_or_else(|| classify_status(ctx.http_status))
	}
}

/// Strategy for the Facebook Graph API token exchange.
///
/// Graph error codes win over everything else: 190 is an invalid token unless its subcode
/// marks a user- or platform-side revocation, throttling codes map to quota, and code 101
/// is an invalid app id.
#[derive(Debug, Default)]
pub struct FacebookStrategy;
impl FacebookStrategy {
	const REVOKED_SUBCODES: [i64; 4] = [458, 459, 460, 464];
	const THROTTLE_CODES: [i64; 4] = [4, 17, 32, 613];
}
impl ProviderStrategy for FacebookStrategy {
	fn classify_token_error(&self, ctx: &ProviderErrorContext) -> ProviderErrorKind {
		if ctx.network_error {
			return ProviderErrorKind::Failure(FailureClass::Network);
		}

		let class = match ctx.graph_code {
			Some(190) => match ctx.graph_subcode {
				Some(sub) if Self::REVOKED_SUBCODES.contains(&sub) =>
					FailureClass::RevokedByProvider,
				_ => FailureClass::InvalidGrant,
			},
			Some(code) if Self::THROTTLE_CODES.contains(&code) => FailureClass::QuotaExceeded,
			Some(80_000..=80_014) => FailureClass::QuotaExceeded,
			Some(1 | 2) => FailureClass::Network,
			Some(101) => return ProviderErrorKind::InvalidClient,
			Some(_) => FailureClass::Unknown,
			None => return classify_status(ctx.http_status),
		};

		ProviderErrorKind::Failure(class)
	}
}

fn truncate_preview(body: String) -> String {
	if body.chars().count() <= ProviderErrorContext::BODY_PREVIEW_LIMIT {
		return body;
	}

	let mut buf = body.chars().take(ProviderErrorContext::BODY_PREVIEW_LIMIT).collect::<String>();

	buf.push('…');

	buf
}

fn match_oauth_error(value: &str) -> Option<ProviderErrorKind> {
	let class = match value.to_ascii_lowercase().as_str() {
		"invalid_grant" | "access_denied" => FailureClass::InvalidGrant,
		"invalid_client" | "unauthorized_client" => return Some(ProviderErrorKind::InvalidClient),
		"rate_limit_exceeded" | "quota_exceeded" | "user_rate_limit_exceeded" =>
			FailureClass::QuotaExceeded,
		"temporarily_unavailable" | "server_error" | "backend_error" => FailureClass::Network,
		_ => return None,
	};

	Some(ProviderErrorKind::Failure(class))
}

fn classify_text(text: Option<&str>) -> Option<ProviderErrorKind> {
	let lowered = text?.to_ascii_lowercase();
	let class = match lowered.as_str() {
		t if t.contains("invalid_grant") => FailureClass::InvalidGrant,
		t if t.contains("invalid_client") || t.contains("unauthorized_client") =>
			return Some(ProviderErrorKind::InvalidClient),
		t if t.contains("rate limit") || t.contains("ratelimit") || t.contains("quota") =>
			FailureClass::QuotaExceeded,
		t if t.contains("temporarily_unavailable") || t.contains("timed out") =>
			FailureClass::Network,
		_ => return None,
	};

	Some(ProviderErrorKind::Failure(class))
}

fn classify_status(status: Option<u16>) -> ProviderErrorKind {
	let class = match status {
		Some(429) => FailureClass::QuotaExceeded,
		Some(code) if code >= 500 => FailureClass::Network,
		_ => FailureClass::Unknown,
	};

	ProviderErrorKind::Failure(class)
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn google(ctx: ProviderErrorContext) -> ProviderErrorKind {
		GoogleStrategy.classify_token_error(&ctx)
	}

	fn facebook(code: i64, subcode: Option<i64>) -> ProviderErrorKind {
		FacebookStrategy.classify_token_error(
			&ProviderErrorContext::new().with_http_status(400).with_graph_codes(Some(code), subcode),
		)
	}

	#[test]
	fn google_prefers_oauth_fields_over_status() {
		assert_eq!(
			google(ProviderErrorContext::new().with_http_status(503).with_oauth_error("invalid_grant")),
			ProviderErrorKind::Failure(FailureClass::InvalidGrant)
		);
		assert_eq!(
			google(ProviderErrorContext::new().with_oauth_error("unauthorized_client")),
			ProviderErrorKind::InvalidClient
		);
		assert_eq!(
			google(ProviderErrorContext::new().with_oauth_error("temporarily_unavailable")),
			ProviderErrorKind::Failure(FailureClass::Network)
		);
	}

	#[test]
	fn google_falls_back_to_hints_and_status() {
		assert_eq!(
			google(ProviderErrorContext::new().with_body_preview("Quota exceeded for project")),
			ProviderErrorKind::Failure(FailureClass::QuotaExceeded)
		);
		assert_eq!(
			google(ProviderErrorContext::new().with_http_status(429)),
			ProviderErrorKind::Failure(FailureClass::QuotaExceeded)
		);
		assert_eq!(
			google(ProviderErrorContext::new().with_http_status(502)),
			ProviderErrorKind::Failure(FailureClass::Network)
		);
		assert_eq!(
			google(ProviderErrorContext::new().with_http_status(418)),
			ProviderErrorKind::Failure(FailureClass::Unknown)
		);
		assert_eq!(
			google(ProviderErrorContext::network_failure("connection refused")),
			ProviderErrorKind::Failure(FailureClass::Network)
		);
	}

	#[test]
	fn facebook_uses_graph_codes() {
		assert_eq!(facebook(190, None), ProviderErrorKind::Failure(FailureClass::InvalidGrant));
		assert_eq!(facebook(190, Some(463)), ProviderErrorKind::Failure(FailureClass::InvalidGrant));
		assert_eq!(
			facebook(190, Some(460)),
			ProviderErrorKind::Failure(FailureClass::RevokedByProvider)
		);
		assert_eq!(facebook(17, None), ProviderErrorKind::Failure(FailureClass::QuotaExceeded));
		assert_eq!(facebook(80_004, None), ProviderErrorKind::Failure(FailureClass::QuotaExceeded));
		assert_eq!(facebook(2, None), ProviderErrorKind::Failure(FailureClass::Network));
		assert_eq!(facebook(101, None), ProviderErrorKind::InvalidClient);
		assert_eq!(facebook(803, None), ProviderErrorKind::Failure(FailureClass::Unknown));
	}

	#[test]
	fn kinds_convert_into_error_taxonomy() {
		let ctx = ProviderErrorContext::new()
			.with_http_status(429)
			.with_retry_after(Some(Duration::seconds(30)))
			.with_error_description("Too many requests");
		let err = ProviderErrorKind::Failure(FailureClass::QuotaExceeded)
			.into_error(Provider::GoogleAnalytics, &ctx);

		match err {
			Error::Transient(t) => {
				assert_eq!(t.class, FailureClass::QuotaExceeded);
				assert_eq!(t.status, Some(429));
				assert_eq!(t.retry_after, Some(Duration::seconds(30)));
				assert_eq!(t.message, "Too many requests (HTTP 429)");
			},
			other => panic!("Expected a transient error, got {other:?}."),
		}

		assert!(matches!(
			ProviderErrorKind::Failure(FailureClass::RevokedByProvider)
				.into_error(Provider::Facebook, &ctx),
			Error::Terminal(_)
		));
		assert!(matches!(
			ProviderErrorKind::InvalidClient.into_error(Provider::Facebook, &ctx),
			Error::Config(ConfigError::InvalidClient { .. })
		));
	}

	#[test]
	fn previews_are_truncated() {
		let ctx = ProviderErrorContext::new().with_body_preview("x".repeat(400));

		assert_eq!(
			ctx.body_preview.expect("Preview should be stored.").chars().count(),
			ProviderErrorContext::BODY_PREVIEW_LIMIT + 1
		);
	}
}
