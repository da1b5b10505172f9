//! Google Ads adapter.
//!
//! Shares Google's token endpoint with GA4 but additionally needs a developer token for every
//! Ads API call, so a missing developer token is reported as misconfiguration before any
//! refresh is attempted.

// self
use crate::{
	_prelude::*,
	auth::Secret,
	connection::Provider,
	error::ConfigError,
	provider::{
		ClientCredentials, ProviderAdapter, ProviderDescriptor, ProviderFuture,
		RefreshRequest, RefreshedTokens, google::{self, GoogleTokenClient},
	},
};

/// Scopes requested when a Google Ads connection is re-authorized.
pub const DEFAULT_SCOPES: &[&str] = &[
	"https://www.googleapis.com/auth/adwords",
	"https://www.googleapis.com/auth/adsdatahub",
	"https://www.googleapis.com/auth/userinfo.email",
	"https://www.googleapis.com/auth/userinfo.profile",
	"openid",
];

/// Refreshes Google Ads connections, re-requesting the granted scopes.
pub struct GoogleAdsAdapter {
	client: GoogleTokenClient,
	developer_token: Option<Secret>,
}
impl GoogleAdsAdapter {
	/// Creates an adapter against Google's production endpoints.
	pub fn new(
		credentials: ClientCredentials,
		developer_token: Option<Secret>,
		http: ReqwestClient,
	) -> Result<Self, ConfigError> {
		let descriptor = google::descriptor(Provider::GoogleAds)?;

		Ok(Self::with_descriptor(descriptor, credentials, developer_token, http))
	}

	/// Creates an adapter against custom endpoints (staging or mock servers).
	pub fn with_descriptor(
		descriptor: ProviderDescriptor,
		credentials: ClientCredentials,
		developer_token: Option<Secret>,
		http: ReqwestClient,
	) -> Self {
		Self { client: GoogleTokenClient::new(descriptor, credentials, http), developer_token }
	}

	/// Developer token required by the Ads API, or a misconfiguration error.
	pub fn developer_token(&self) -> Result<&Secret, ConfigError> {
		self.developer_token.as_ref().filter(|token| !token.is_empty()).ok_or(
			ConfigError::MissingCredential {
				provider: Provider::GoogleAds,
				credential: "developer_token",
			},
		)
	}
}
impl ProviderAdapter for GoogleAdsAdapter {
	fn provider(&self) -> Provider {
		Provider::GoogleAds
	}

	fn descriptor(&self) -> &ProviderDescriptor {
		self.client.descriptor()
	}

	fn client_id(&self) -> Result<&str, ConfigError> {
		self.client.credentials().require_id(Provider::GoogleAds)
	}

	fn default_scopes(&self) -> &'static [&'static str] {
		DEFAULT_SCOPES
	}

	fn refresh(&self, request: RefreshRequest) -> ProviderFuture<'_, RefreshedTokens> {
		Box::pin(async move {
			self.developer_token()?;

			let scopes = google::requested_scopes(&request.scopes, DEFAULT_SCOPES)?;

			self.client.refresh(&request.credential, Some(&scopes)).await
		})
	}
}
