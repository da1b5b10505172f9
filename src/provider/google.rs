//! Google OAuth refresh shared by the GA4 and Google Ads adapters.
//!
//! Both products use the same token endpoint and the standard `refresh_token` grant, issued
//! through the `oauth2` crate over an [`InstrumentedHandle`].

// crates.io
use oauth2::{
	AuthType, AuthUrl, ClientId, ClientSecret, EndpointNotSet, EndpointSet, HttpClientError,
	RefreshToken, RequestTokenError, Scope, TokenResponse, TokenUrl,
	basic::{BasicClient, BasicErrorResponse, BasicRequestTokenError},
};
// self
use crate::{
	_prelude::*,
	auth::{ScopeSet, Secret},
	connection::Provider,
	error::{ConfigError, TransientError},
	http::{InstrumentedHandle, ResponseMetadata, ResponseMetadataSlot},
	provider::{
		ClientCredentials, FailureClass, GoogleStrategy, ProviderDescriptor,
		ProviderErrorContext, ProviderQuirks, ProviderStrategy, RefreshedTokens,
	},
};

type ConfiguredBasicClient =
	BasicClient<EndpointSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;

/// Google's consent screen.
pub const AUTHORIZATION_ENDPOINT: &str = "https://accounts.google.com/o/oauth2/auth";
/// Google's token endpoint.
pub const TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";
/// Google refresh tokens start with this marker.
pub const REFRESH_TOKEN_PREFIX: &str = "1//";

/// Builds the standard Google descriptor for `provider`.
pub fn descriptor(provider: Provider) -> Result<ProviderDescriptor, ConfigError> {
	let parse = |raw: &str| Url::parse(raw).map_err(|source| ConfigError::InvalidDescriptor { source });

	ProviderDescriptor::builder(provider)
		.authorization_endpoint(parse(AUTHORIZATION_ENDPOINT)?)
		.token_endpoint(parse(TOKEN_ENDPOINT)?)
		.quirks(ProviderQuirks {
			scope_delimiter: ' ',
			credential_prefix: Some(REFRESH_TOKEN_PREFIX.into()),
		})
		.build()
		.map_err(|e| ConfigError::InvalidSetting { name: "google_descriptor", reason: e.to_string() })
}

/// Scopes to re-request on refresh: the granted ones, or `defaults` when none were recorded.
pub fn requested_scopes(granted: &ScopeSet, defaults: &[&str]) -> Result<ScopeSet, ConfigError> {
	if !granted.is_empty() {
		return Ok(granted.clone());
	}

	ScopeSet::new(defaults.iter().copied())
		.map_err(|e| ConfigError::InvalidSetting { name: "google_scopes", reason: e.to_string() })
}

/// Google token-endpoint client parameterized by descriptor and credentials.
pub struct GoogleTokenClient {
	descriptor: ProviderDescriptor,
	credentials: ClientCredentials,
	http: ReqwestClient,
	strategy: Arc<dyn ProviderStrategy>,
}
impl GoogleTokenClient {
	/// Creates a client using [`GoogleStrategy`] for error classification.
	pub fn new(
		descriptor: ProviderDescriptor,
		credentials: ClientCredentials,
		http: ReqwestClient,
	) -> Self {
		Self { descriptor, credentials, http, strategy: Arc::new(GoogleStrategy) }
	}

	/// Overrides the error classification strategy.
	pub fn with_strategy(mut self, strategy: Arc<dyn ProviderStrategy>) -> Self {
		self.strategy = strategy;

		self
	}

	/// Descriptor in use.
	pub fn descriptor(&self) -> &ProviderDescriptor {
		&self.descriptor
	}

	/// Configured credentials.
	pub fn credentials(&self) -> &ClientCredentials {
		&self.credentials
	}

	/// Runs the `refresh_token` grant, optionally re-requesting `scopes`.
	pub async fn refresh(
		&self,
		refresh_token: &Secret,
		scopes: Option<&ScopeSet>,
	) -> Result<RefreshedTokens> {
		let provider = self.descriptor.provider;
		let oauth_client = self.oauth_client()?;
		let meta = ResponseMetadataSlot::default();
		let handle = InstrumentedHandle::new(self.http.clone(), meta.clone());
		let secret = RefreshToken::new(refresh_token.expose().to_owned());
		let mut request = oauth_client.exchange_refresh_token(&secret);

		for scope in scopes.into_iter().flat_map(ScopeSet::iter) {
			request = request.add_scope(Scope::new(scope.to_owned()));
		}

		let response = request
			.request_async(&handle)
			.await
			.map_err(|e| self.map_request_error(provider, meta.take(), e))?;
		let returned_scopes = response
			.scopes()
			.map(|granted| ScopeSet::new(granted.iter().map(|s| s.as_str().to_owned())))
			.transpose()
			.map_err(|e| {
				TransientError::new(FailureClass::Unknown, format!("Provider returned bad scopes: {e}"))
			})?;

		Ok(RefreshedTokens {
			access_token: Secret::new(response.access_token().secret().as_str()),
			refresh_token: response.refresh_token().map(|t| Secret::new(t.secret().as_str())),
			expires_in: response
				.expires_in()
				.and_then(|lifetime| i64::try_from(lifetime.as_secs()).ok()),
			scopes: returned_scopes,
		})
	}

	fn oauth_client(&self) -> Result<ConfiguredBasicClient, ConfigError> {
		let provider = self.descriptor.provider;
		let client_id = self.credentials.require_id(provider)?;
		let client_secret = self.credentials.require_secret(provider)?;
		let auth_url = AuthUrl::new(self.descriptor.endpoints.authorization.to_string())
			.map_err(|source| ConfigError::InvalidDescriptor { source })?;
		let token_url = TokenUrl::new(self.descriptor.endpoints.token.to_string())
			.map_err(|source| ConfigError::InvalidDescriptor { source })?;

		Ok(BasicClient::new(ClientId::new(client_id.to_owned()))
			.set_client_secret(ClientSecret::new(client_secret.expose().to_owned()))
			.set_auth_uri(auth_url)
			.set_token_uri(token_url)
			.set_auth_type(AuthType::RequestBody))
	}

	fn map_request_error(
		&self,
		provider: Provider,
		meta: Option<ResponseMetadata>,
		err: BasicRequestTokenError<HttpClientError<ReqwestError>>,
	) -> Error {
		let status = meta.as_ref().and_then(|m| m.status);
		let retry_after = meta.as_ref().and_then(|m| m.retry_after);
		let mut ctx = match err {
			RequestTokenError::ServerResponse(response) => server_response_context(&response),
			RequestTokenError::Request(HttpClientError::Http(inner)) =>
				return ConfigError::from(inner).into(),
			RequestTokenError::Request(HttpClientError::Reqwest(inner)) if inner.is_builder() =>
				return ConfigError::from(*inner).into(),
			RequestTokenError::Request(inner) => ProviderErrorContext::network_failure(inner.to_string()),
			RequestTokenError::Parse(error, body) => ProviderErrorContext::new()
				.with_error_description(format!("Token response could not be parsed: {error}"))
				.with_body_preview(String::from_utf8_lossy(&body)),
			RequestTokenError::Other(message) =>
				ProviderErrorContext::new().with_error_description(message),
		};

		if let Some(status) = status {
			ctx = ctx.with_http_status(status);
		}

		ctx = ctx.with_retry_after(retry_after);

		self.strategy.classify_token_error(&ctx).into_error(provider, &ctx)
	}
}

fn server_response_context(response: &BasicErrorResponse) -> ProviderErrorContext {
	let mut ctx = ProviderErrorContext::new().with_oauth_error(response.error().as_ref());

	if let Some(description) = response.error_description() {
		ctx = ctx.with_error_description(description.as_str());
	}

	ctx
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn standard_descriptor_points_at_google() {
		let descriptor =
			descriptor(Provider::GoogleAds).expect("Google descriptor should build.");

		assert_eq!(descriptor.endpoints.token.as_str(), TOKEN_ENDPOINT);
		assert_eq!(descriptor.quirks.credential_prefix.as_deref(), Some("1//"));
	}

	#[test]
	fn requested_scopes_fall_back_to_defaults() {
		let granted = ScopeSet::new(["openid"]).expect("Scope fixture should be valid.");

		assert_eq!(
			requested_scopes(&granted, &["email"]).expect("Granted scopes should be kept."),
			granted
		);
		assert_eq!(
			requested_scopes(&ScopeSet::default(), &["email", "openid"])
				.expect("Defaults should be valid.")
				.len(),
			2
		);
	}

	#[tokio::test]
	async fn missing_credentials_fail_before_any_request() {
		let client = GoogleTokenClient::new(
			descriptor(Provider::GoogleAnalytics).expect("Google descriptor should build."),
			ClientCredentials::default(),
			ReqwestClient::new(),
		);
		let err = client
			.refresh(&Secret::new("1//refresh"), None)
			.await
			.expect_err("Refresh without a client id must fail.");

		assert!(matches!(
			err,
			Error::Config(ConfigError::MissingCredential { credential: "client_id", .. })
		));
	}
}
