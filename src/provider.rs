//! Provider adapters, descriptors (data), and strategies (error classification).
//!
//! `descriptor` holds the validated endpoints and quirks of each platform, `strategy` maps
//! raw token-endpoint failures into [`FailureClass`] values, and the adapter modules implement
//! [`ProviderAdapter`] for Google Analytics 4, Google Ads, and Facebook Marketing. Everything
//! provider-agnostic (decryption, persistence, failure bookkeeping) lives in the manager.

pub mod descriptor;
pub mod facebook;
pub mod google;
pub mod google_ads;
pub mod google_analytics;
pub mod strategy;

pub use descriptor::*;
pub use facebook::FacebookAdapter;
pub use google_ads::GoogleAdsAdapter;
pub use google_analytics::GoogleAnalyticsAdapter;
pub use strategy::*;

// self
use crate::{
	_prelude::*,
	auth::{ConnectionId, ScopeSet, Secret},
	connection::Provider,
	error::{ConfigError, TerminalError},
};

/// Boxed future returned by [`ProviderAdapter::refresh`].
pub type ProviderFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + 'a + Send>>;

/// Classified reason a refresh failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
	/// The credential will never refresh again (expired, revoked, or malformed).
	InvalidGrant,
	/// The user or platform withdrew the app's authorization.
	RevokedByProvider,
	/// Rate limit or quota hit; retry later.
	QuotaExceeded,
	/// Transport failure, timeout, or upstream 5xx.
	Network,
	/// Anything the strategy could not classify; treated as temporary.
	Unknown,
}
impl FailureClass {
	/// Every class, in declaration order.
	pub const ALL: [Self; 5] = [
		Self::InvalidGrant,
		Self::RevokedByProvider,
		Self::QuotaExceeded,
		Self::Network,
		Self::Unknown,
	];

	/// Stable snake_case label used in failure reasons and metrics.
	pub fn as_str(self) -> &'static str {
		match self {
			Self::InvalidGrant => "invalid_grant",
			Self::RevokedByProvider => "revoked_by_provider",
			Self::QuotaExceeded => "quota_exceeded",
			Self::Network => "network",
			Self::Unknown => "unknown",
		}
	}

	/// Returns `true` when automatic refresh must stop for good.
	pub fn is_terminal(self) -> bool {
		matches!(self, Self::InvalidGrant | Self::RevokedByProvider)
	}
}
impl Display for FailureClass {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Which stored token a provider exchanges during refresh.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefreshCredential {
	/// Standard `refresh_token` grant.
	RefreshToken,
	/// Long-lived access-token exchange (Facebook `fb_exchange_token`).
	AccessToken,
}
impl RefreshCredential {
	/// Label used in error messages.
	pub fn label(self) -> &'static str {
		match self {
			Self::RefreshToken => "refresh token",
			Self::AccessToken => "access token",
		}
	}
}

/// OAuth client credentials configured for one provider; either half may be missing.
#[derive(Clone, Debug, Default)]
pub struct ClientCredentials {
	/// OAuth client (app) identifier.
	pub client_id: Option<String>,
	/// OAuth client (app) secret.
	pub client_secret: Option<Secret>,
}
impl ClientCredentials {
	/// Creates a fully populated credential pair.
	pub fn new(client_id: impl Into<String>, client_secret: impl Into<Secret>) -> Self {
		Self { client_id: Some(client_id.into()), client_secret: Some(client_secret.into()) }
	}

	/// Returns the client id or a misconfiguration error naming `provider`.
	pub fn require_id(&self, provider: Provider) -> Result<&str, ConfigError> {
		self.client_id
			.as_deref()
			.filter(|id| !id.is_empty())
			.ok_or(ConfigError::MissingCredential { provider, credential: "client_id" })
	}

	/// Returns the client secret or a misconfiguration error naming `provider`.
	pub fn require_secret(&self, provider: Provider) -> Result<&Secret, ConfigError> {
		self.client_secret
			.as_ref()
			.filter(|secret| !secret.is_empty())
			.ok_or(ConfigError::MissingCredential { provider, credential: "client_secret" })
	}
}

/// Input handed to [`ProviderAdapter::refresh`].
#[derive(Clone, Debug)]
pub struct RefreshRequest {
	/// Connection being refreshed (for logging only).
	pub connection_id: ConnectionId,
	/// Decrypted credential selected by [`ProviderAdapter::refresh_credential`].
	pub credential: Secret,
	/// Scopes currently granted to the connection.
	pub scopes: ScopeSet,
}

/// Tokens returned by a successful refresh.
#[derive(Clone, Debug)]
pub struct RefreshedTokens {
	/// New access token.
	pub access_token: Secret,
	/// Rotated refresh token, when the provider issued one.
	pub refresh_token: Option<Secret>,
	/// Lifetime in seconds, when reported.
	pub expires_in: Option<i64>,
	/// Scopes reported by the provider, when present.
	pub scopes: Option<ScopeSet>,
}

/// Provider-specific half of the refresh flow.
///
/// Implementations only talk to the provider; decrypting, persisting, and failure bookkeeping
/// happen in [`ConnectionManager`](crate::manager::ConnectionManager).
pub trait ProviderAdapter
where
	Self: Send + Sync,
{
	/// Provider served by this adapter.
	fn provider(&self) -> Provider;

	/// Endpoints and quirks.
	fn descriptor(&self) -> &ProviderDescriptor;

	/// Configured OAuth client id.
	fn client_id(&self) -> Result<&str, ConfigError>;

	/// Full scope list requested during re-authorization.
	fn default_scopes(&self) -> &'static [&'static str];

	/// Stored token exchanged by [`refresh`](Self::refresh).
	fn refresh_credential(&self) -> RefreshCredential {
		RefreshCredential::RefreshToken
	}

	/// Cheap structural check run before any network call.
	fn validate_credential_shape(&self, credential: &Secret) -> Result<(), TerminalError> {
		let kind = self.refresh_credential().label();

		if credential.is_empty() {
			return Err(TerminalError::invalid_grant(format!("stored {kind} is empty")));
		}
		if let Some(prefix) = self.descriptor().quirks.credential_prefix.as_deref() {
			if !credential.expose().starts_with(prefix) {
				return Err(TerminalError::invalid_grant(format!(
					"stored {kind} does not have the expected `{prefix}` prefix"
				)));
			}
		}

		Ok(())
	}

	/// Exchanges the credential for new tokens.
	fn refresh(&self, request: RefreshRequest) -> ProviderFuture<'_, RefreshedTokens>;
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn failure_classes_render_snake_case() {
		assert_eq!(FailureClass::InvalidGrant.to_string(), "invalid_grant");
		assert_eq!(FailureClass::QuotaExceeded.to_string(), "quota_exceeded");
		assert!(FailureClass::RevokedByProvider.is_terminal());
		assert!(!FailureClass::Unknown.is_terminal());
	}

	#[test]
	fn client_credentials_report_missing_halves() {
		let creds = ClientCredentials { client_id: Some("app".into()), client_secret: None };

		assert_eq!(creds.require_id(Provider::Facebook).expect("Client id should exist."), "app");
		assert!(matches!(
			creds.require_secret(Provider::Facebook),
			Err(ConfigError::MissingCredential { credential: "client_secret", .. })
		));
	}
}
