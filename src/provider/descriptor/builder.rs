// self
use crate::{
	_prelude::*,
	connection::Provider,
	provider::{ProviderDescriptor, ProviderEndpoints, ProviderQuirks},
};

/// Errors raised while constructing or validating descriptors.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum ProviderDescriptorError {
	/// Authorization endpoint is required for re-authorization URLs.
	#[error("Missing authorization endpoint.")]
	MissingAuthorizationEndpoint,
	/// Token endpoint is mandatory for refreshes.
	#[error("Missing token endpoint.")]
	MissingTokenEndpoint,
	/// Endpoints must use HTTPS (plain HTTP is tolerated for loopback hosts only).
	#[error("The {endpoint} endpoint must use HTTPS: {url}.")]
	InsecureEndpoint {
		/// Which endpoint failed validation.
		endpoint: &'static str,
		/// Endpoint URL that failed validation.
		url: String,
	},
	/// Reject scope delimiters that are control characters.
	#[error("Scope delimiter must be a printable character.")]
	InvalidScopeDelimiter {
		/// Invalid delimiter that was supplied.
		delimiter: char,
	},
}

/// Builder for [`ProviderDescriptor`] values.
#[derive(Debug)]
pub struct ProviderDescriptorBuilder {
	/// Provider being described.
	pub provider: Provider,
	/// Authorization endpoint.
	pub authorization_endpoint: Option<Url>,
	/// Token endpoint used for refreshes.
	pub token_endpoint: Option<Url>,
	/// Provider-specific quirks.
	pub quirks: ProviderQuirks,
}
impl ProviderDescriptorBuilder {
	/// Creates a new builder for the provided provider.
	pub fn new(provider: Provider) -> Self {
		Self {
			provider,
			authorization_endpoint: None,
			token_endpoint: None,
			quirks: ProviderQuirks::default(),
		}
	}

	/// Sets the authorization endpoint.
	pub fn authorization_endpoint(mut self, url: Url) -> Self {
		self.authorization_endpoint = Some(url);

		self
	}

	/// Sets the token endpoint.
	pub fn token_endpoint(mut self, url: Url) -> Self {
		self.token_endpoint = Some(url);

		self
	}

	/// Overrides the provider quirks.
	pub fn quirks(mut self, quirks: ProviderQuirks) -> Self {
		self.quirks = quirks;

		self
	}

	/// Consumes the builder and validates the resulting descriptor.
	pub fn build(self) -> Result<ProviderDescriptor, ProviderDescriptorError> {
		let authorization = self
			.authorization_endpoint
			.ok_or(ProviderDescriptorError::MissingAuthorizationEndpoint)?;
		let token = self.token_endpoint.ok_or(ProviderDescriptorError::MissingTokenEndpoint)?;
		let descriptor = ProviderDescriptor {
			provider: self.provider,
			endpoints: ProviderEndpoints { authorization, token },
			quirks: self.quirks,
		};

		descriptor.validate()?;

		Ok(descriptor)
	}
}

impl ProviderDescriptor {
	fn validate(&self) -> Result<(), ProviderDescriptorError> {
		validate_endpoint("authorization", &self.endpoints.authorization)?;
		validate_endpoint("token", &self.endpoints.token)?;
		validate_scope_delimiter(self.quirks.scope_delimiter)?;

		Ok(())
	}
}

fn validate_endpoint(name: &'static str, url: &Url) -> Result<(), ProviderDescriptorError> {
	let loopback = matches!(url.host_str(), Some("localhost" | "127.0.0.1" | "[::1]"));

	match url.scheme() {
		"https" => Ok(()),
		"http" if loopback => Ok(()),
		_ => Err(ProviderDescriptorError::InsecureEndpoint { endpoint: name, url: url.to_string() }),
	}
}

fn validate_scope_delimiter(delimiter: char) -> Result<(), ProviderDescriptorError> {
	if delimiter.is_control() {
		Err(ProviderDescriptorError::InvalidScopeDelimiter { delimiter })
	} else {
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn url(raw: &str) -> Url {
		Url::parse(raw).expect("Endpoint fixture should parse.")
	}

	#[test]
	fn rejects_plain_http_for_remote_hosts() {
		let err = ProviderDescriptor::builder(Provider::GoogleAds)
			.authorization_endpoint(url("https://accounts.example.com/auth"))
			.token_endpoint(url("http://oauth.example.com/token"))
			.build()
			.expect_err("Remote plain-HTTP endpoints must be rejected.");

		assert!(matches!(err, ProviderDescriptorError::InsecureEndpoint { endpoint: "token", .. }));
	}

	#[test]
	fn allows_loopback_and_requires_both_endpoints() {
		let descriptor = ProviderDescriptor::builder(Provider::Facebook)
			.authorization_endpoint(url("http://127.0.0.1:8080/dialog/oauth"))
			.token_endpoint(url("http://localhost:8080/oauth/access_token"))
			.build()
			.expect("Loopback endpoints should be accepted.");

		assert_eq!(descriptor.quirks.scope_delimiter, ' ');
		assert_eq!(
			ProviderDescriptor::builder(Provider::Facebook)
				.token_endpoint(url("https://graph.example.com/token"))
				.build(),
			Err(ProviderDescriptorError::MissingAuthorizationEndpoint)
		);
	}

	#[test]
	fn rebased_keeps_paths_and_quirks() {
		let descriptor = ProviderDescriptor::builder(Provider::Facebook)
			.authorization_endpoint(url("https://www.facebook.com/v18.0/dialog/oauth"))
			.token_endpoint(url("https://graph.facebook.com/v18.0/oauth/access_token"))
			.quirks(ProviderQuirks { scope_delimiter: ',', credential_prefix: Some("EAA".into()) })
			.build()
			.expect("Descriptor fixture should build.");
		let rebased = descriptor
			.rebased(&url("http://127.0.0.1:9000"))
			.expect("Rebasing onto a loopback host should succeed.");

		assert_eq!(rebased.endpoints.token.as_str(), "http://127.0.0.1:9000/v18.0/oauth/access_token");
		assert_eq!(rebased.quirks, descriptor.quirks);
	}
}
