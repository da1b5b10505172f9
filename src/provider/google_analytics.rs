//! Google Analytics 4 adapter.

// self
use crate::{
	_prelude::*,
	connection::Provider,
	error::ConfigError,
	provider::{
		ClientCredentials, ProviderAdapter, ProviderDescriptor, ProviderFuture,
		RefreshRequest, RefreshedTokens, google::{self, GoogleTokenClient},
	},
};

/// Scopes requested when a GA4 connection is re-authorized.
pub const DEFAULT_SCOPES: &[&str] = &[
	"https://www.googleapis.com/auth/analytics.readonly",
	"https://www.googleapis.com/auth/analytics",
	"https://www.googleapis.com/auth/analytics.manage.users.readonly",
	"https://www.googleapis.com/auth/userinfo.email",
	"https://www.googleapis.com/auth/userinfo.profile",
];

/// Refreshes GA4 connections with the standard Google `refresh_token` grant.
pub struct GoogleAnalyticsAdapter {
	client: GoogleTokenClient,
}
impl GoogleAnalyticsAdapter {
	/// Creates an adapter against Google's production endpoints.
	pub fn new(credentials: ClientCredentials, http: ReqwestClient) -> Result<Self, ConfigError> {
		let descriptor = google::descriptor(Provider::GoogleAnalytics)?;

		Ok(Self::with_descriptor(descriptor, credentials, http))
	}

	/// Creates an adapter against custom endpoints (staging or mock servers).
	pub fn with_descriptor(
		descriptor: ProviderDescriptor,
		credentials: ClientCredentials,
		http: ReqwestClient,
	) -> Self {
		Self { client: GoogleTokenClient::new(descriptor, credentials, http) }
	}
}
impl ProviderAdapter for GoogleAnalyticsAdapter {
	fn provider(&self) -> Provider {
		Provider::GoogleAnalytics
	}

	fn descriptor(&self) -> &ProviderDescriptor {
		self.client.descriptor()
	}

	fn client_id(&self) -> Result<&str, ConfigError> {
		self.client.credentials().require_id(Provider::GoogleAnalytics)
	}

	fn default_scopes(&self) -> &'static [&'static str] {
		DEFAULT_SCOPES
	}

	fn refresh(&self, request: RefreshRequest) -> ProviderFuture<'_, RefreshedTokens> {
		Box::pin(async move {
			let scopes = google::requested_scopes(&request.scopes, DEFAULT_SCOPES)?;

			self.client.refresh(&request.credential, Some(&scopes)).await
		})
	}
}
