//! Facebook Marketing (Graph API) adapter.
//!
//! Facebook issues no refresh tokens. A long-lived user access token is extended by
//! exchanging the token itself (`grant_type=fb_exchange_token`) before it expires, so the
//! refresh credential here is the stored access token.

// crates.io
use serde::de::DeserializeOwned;
// self
use crate::{
	_prelude::*,
	auth::Secret,
	connection::Provider,
	error::{ConfigError, TransientError},
	http,
	provider::{
		ClientCredentials, FacebookStrategy, FailureClass, ProviderAdapter, ProviderDescriptor,
		ProviderErrorContext, ProviderFuture, ProviderQuirks, ProviderStrategy, RefreshCredential,
		RefreshRequest, RefreshedTokens,
	},
};

/// Graph API version used when none is configured.
pub const DEFAULT_API_VERSION: &str = "v18.0";
/// Facebook user access tokens start with this marker.
pub const ACCESS_TOKEN_PREFIX: &str = "EAA";

/// Permissions requested when a Facebook connection is re-authorized.
pub const DEFAULT_SCOPES: &[&str] = &[
	"email",
	"public_profile",
	"pages_read_engagement",
	"pages_manage_metadata",
	"ads_read",
	"ads_management",
	"business_management",
	"pages_show_list",
	"read_insights",
	"pages_read_user_content",
	"pages_manage_posts",
	"pages_manage_engagement",
];

/// Builds the Facebook descriptor for a Graph API version (e.g. `v18.0`).
pub fn descriptor(api_version: &str) -> Result<ProviderDescriptor, ConfigError> {
	let parse = |raw: String| Url::parse(&raw).map_err(|source| ConfigError::InvalidDescriptor { source });

	ProviderDescriptor::builder(Provider::Facebook)
		.authorization_endpoint(parse(format!("https://www.facebook.com/{api_version}/dialog/oauth"))?)
		.token_endpoint(parse(format!("https://graph.facebook.com/{api_version}/oauth/access_token"))?)
		.quirks(ProviderQuirks {
			scope_delimiter: ',',
			credential_prefix: Some(ACCESS_TOKEN_PREFIX.into()),
		})
		.build()
		.map_err(|e| ConfigError::InvalidSetting { name: "facebook_descriptor", reason: e.to_string() })
}

#[derive(Deserialize)]
struct ExchangeResponse {
	access_token: String,
	#[serde(default)]
	expires_in: Option<i64>,
}

#[derive(Deserialize)]
struct GraphErrorEnvelope {
	error: GraphError,
}

#[derive(Deserialize)]
struct GraphError {
	#[serde(default)]
	message: Option<String>,
	#[serde(default, rename = "type")]
	kind: Option<String>,
	#[serde(default)]
	code: Option<i64>,
	#[serde(default)]
	error_subcode: Option<i64>,
}

/// Extends Facebook user access tokens through the Graph API token exchange.
pub struct FacebookAdapter {
	descriptor: ProviderDescriptor,
	credentials: ClientCredentials,
	http: ReqwestClient,
	strategy: Arc<dyn ProviderStrategy>,
}
impl FacebookAdapter {
	/// Creates an adapter against the production Graph API for `api_version`.
	pub fn new(
		credentials: ClientCredentials,
		api_version: &str,
		http: ReqwestClient,
	) -> Result<Self, ConfigError> {
		Ok(Self::with_descriptor(descriptor(api_version)?, credentials, http))
	}

	/// Creates an adapter against custom endpoints (staging or mock servers).
	pub fn with_descriptor(
		descriptor: ProviderDescriptor,
		credentials: ClientCredentials,
		http: ReqwestClient,
	) -> Self {
		Self { descriptor, credentials, http, strategy: Arc::new(FacebookStrategy) }
	}

	/// Overrides the error classification strategy.
	pub fn with_strategy(mut self, strategy: Arc<dyn ProviderStrategy>) -> Self {
		self.strategy = strategy;

		self
	}

	async fn exchange(&self, access_token: &Secret) -> Result<RefreshedTokens> {
		let app_id = self.credentials.require_id(Provider::Facebook)?;
		let app_secret = self.credentials.require_secret(Provider::Facebook)?;
		let mut url = self.descriptor.endpoints.token.clone();

		url.query_pairs_mut()
			.append_pair("grant_type", "fb_exchange_token")
			.append_pair("client_id", app_id)
			.append_pair("client_secret", app_secret.expose())
			.append_pair("fb_exchange_token", access_token.expose());

		let response = self.http.get(url).send().await.map_err(|e| self.transport_error(e))?;
		let status = response.status();
		let retry_after = http::parse_retry_after(response.headers());
		let body = response.bytes().await.map_err(|e| self.transport_error(e))?;

		if status.is_success() {
			let parsed = parse_json::<ExchangeResponse>(&body).map_err(|reason| {
				TransientError {
					class: FailureClass::Unknown,
					message: format!("Token exchange response could not be parsed: {reason}"),
					status: Some(status.as_u16()),
					retry_after: None,
				}
			})?;

			return Ok(RefreshedTokens {
				access_token: Secret::new(parsed.access_token),
				refresh_token: None,
				expires_in: parsed.expires_in,
				scopes: None,
			});
		}

		let ctx = match parse_json::<GraphErrorEnvelope>(&body) {
			Ok(envelope) => {
				let GraphError { message, kind, code, error_subcode } = envelope.error;
				let mut ctx = ProviderErrorContext::new().with_graph_codes(code, error_subcode);

				if let Some(kind) = kind {
					ctx = ctx.with_oauth_error(kind);
				}
				if let Some(message) = message {
					ctx = ctx.with_error_description(message);
				}

				ctx
			},
			Err(_) => ProviderErrorContext::new().with_body_preview(String::from_utf8_lossy(&body)),
		}
		.with_http_status(status.as_u16())
		.with_retry_after(retry_after);

		Err(self.strategy.classify_token_error(&ctx).into_error(Provider::Facebook, &ctx))
	}

	fn transport_error(&self, err: ReqwestError) -> Error {
		if err.is_builder() {
			return ConfigError::from(err).into();
		}

		let mut ctx = ProviderErrorContext::network_failure(err.to_string());

		if let Some(status) = err.status() {
			ctx = ctx.with_http_status(status.as_u16());
		}

		self.strategy.classify_token_error(&ctx).into_error(Provider::Facebook, &ctx)
	}
}
impl ProviderAdapter for FacebookAdapter {
	fn provider(&self) -> Provider {
		Provider::Facebook
	}

	fn descriptor(&self) -> &ProviderDescriptor {
		&self.descriptor
	}

	fn client_id(&self) -> Result<&str, ConfigError> {
		self.credentials.require_id(Provider::Facebook)
	}

	fn default_scopes(&self) -> &'static [&'static str] {
		DEFAULT_SCOPES
	}

	fn refresh_credential(&self) -> RefreshCredential {
		RefreshCredential::AccessToken
	}

	fn refresh(&self, request: RefreshRequest) -> ProviderFuture<'_, RefreshedTokens> {
		Box::pin(async move { self.exchange(&request.credential).await })
	}
}

fn parse_json<T>(body: &[u8]) -> Result<T, String>
where
	T: DeserializeOwned,
{
	let mut de = serde_json::Deserializer::from_slice(body);

	serde_path_to_error::deserialize(&mut de).map_err(|e| e.to_string())
}
