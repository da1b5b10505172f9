// self
use adgrant::{
	connection::Provider,
	error::{ConfigError, Error},
	provider::{
		FailureClass, ProviderDescriptor, ProviderDescriptorBuilder, ProviderDescriptorError,
		ProviderErrorContext, ProviderErrorKind, ProviderQuirks, ProviderStrategy, facebook,
		google,
	},
	url::Url,
};

fn url(value: &str) -> Url {
	Url::parse(value).expect("Failed to parse mock provider URL.")
}

fn builder(provider: Provider) -> ProviderDescriptorBuilder {
	ProviderDescriptor::builder(provider)
}

#[test]
fn descriptor_rejects_insecure_and_missing_endpoints() {
	let err = builder(Provider::GoogleAds)
		.token_endpoint(url("https://example.com/token"))
		.build()
		.expect_err("Descriptor builder should require an authorization endpoint.");

	assert_eq!(err, ProviderDescriptorError::MissingAuthorizationEndpoint);

	let err = builder(Provider::GoogleAds)
		.authorization_endpoint(url("http://example.com/auth"))
		.token_endpoint(url("https://example.com/token"))
		.build()
		.expect_err("Descriptor builder should reject insecure authorization endpoints.");

	assert!(matches!(
		err,
		ProviderDescriptorError::InsecureEndpoint { endpoint: "authorization", .. }
	));

	let err = builder(Provider::Facebook)
		.authorization_endpoint(url("https://example.com/auth"))
		.token_endpoint(url("https://example.com/token"))
		.quirks(ProviderQuirks { scope_delimiter: '\n', ..ProviderQuirks::default() })
		.build()
		.expect_err("Descriptor builder should reject control-character delimiters.");

	assert_eq!(err, ProviderDescriptorError::InvalidScopeDelimiter { delimiter: '\n' });
}

#[test]
fn loopback_http_is_tolerated_and_rebasing_keeps_quirks() {
	let descriptor = google::descriptor(Provider::GoogleAnalytics)
		.expect("Google descriptor should build.")
		.rebased(&url("http://127.0.0.1:8080"))
		.expect("Loopback rebasing should be accepted.");

	assert_eq!(descriptor.endpoints.token.as_str(), "http://127.0.0.1:8080/token");
	assert_eq!(descriptor.endpoints.authorization.as_str(), "http://127.0.0.1:8080/o/oauth2/auth");
	assert_eq!(descriptor.quirks.credential_prefix.as_deref(), Some("1//"));

	let facebook = facebook::descriptor("v18.0").expect("Facebook descriptor should build.");

	assert!(facebook.rebased(&url("http://example.com")).is_err());
}

#[test]
fn custom_strategy_feeds_the_error_taxonomy() {
	struct AlwaysThrottled;
	impl ProviderStrategy for AlwaysThrottled {
		fn classify_token_error(&self, _ctx: &ProviderErrorContext) -> ProviderErrorKind {
			ProviderErrorKind::Failure(FailureClass::QuotaExceeded)
		}
	}

	let ctx = ProviderErrorContext::new()
		.with_http_status(400)
		.with_oauth_error("invalid_grant")
		.with_retry_after(Some(time::Duration::seconds(5)));
	let error = AlwaysThrottled.classify_token_error(&ctx).into_error(Provider::GoogleAds, &ctx);

	match error {
		Error::Transient(e) => {
			assert_eq!(e.class, FailureClass::QuotaExceeded);
			assert_eq!(e.status, Some(400));
			assert_eq!(e.retry_after, Some(time::Duration::seconds(5)));
		},
		other => panic!("Expected a transient error, got {other:?}."),
	}

	let misconfigured =
		ProviderErrorKind::InvalidClient.into_error(Provider::Facebook, &ProviderErrorContext::new());

	assert!(matches!(
		misconfigured,
		Error::Config(ConfigError::InvalidClient { provider: Provider::Facebook, .. })
	));
}
