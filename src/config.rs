//! Runtime settings for the connection manager.
//!
//! [`Config`] deserializes with serde (every field except the encryption secret has a default)
//! or loads from environment variables through [`Config::from_env`]:
//!
//! | variable | field |
//! |---|---|
//! | `ANALYTICS_TOKEN_ENCRYPTION_KEY` | `encryption_secret` (required) |
//! | `FRONTEND_URL` | `redirect_base` |
//! | `GOOGLE_CLIENT_ID`, `GOOGLE_CLIENT_SECRET` | Google OAuth client |
//! | `GOOGLE_ADS_DEVELOPER_TOKEN` (or `GOOGLE_DEVELOPER_TOKEN`) | Google Ads developer token |
//! | `FACEBOOK_APP_ID`, `FACEBOOK_APP_SECRET`, `FACEBOOK_API_VERSION` | Facebook app |
//! | `ADGRANT_REFRESH_BUFFER_SECS` | `refresh_buffer_secs` |
//! | `ADGRANT_MAX_FAILURES` | `max_failures` |
//! | `ADGRANT_REQUEST_TIMEOUT_SECS` | `request_timeout_secs` |
//! | `ADGRANT_REAUTH_STATE_MAX_AGE_SECS` | `reauth_state_max_age_secs` |
//! | `ADGRANT_STALE_TOKEN_POLICY` | `stale_token_policy` (`refuse` or `attempt_stale`) |

// self
use crate::{
	_prelude::*,
	auth::Secret,
	error::ConfigError,
	expiry::DEFAULT_REFRESH_BUFFER,
	failure::DEFAULT_MAX_FAILURES,
	http::DEFAULT_REQUEST_TIMEOUT,
	provider::{ClientCredentials, facebook},
	reauth::{DEFAULT_REDIRECT_BASE, DEFAULT_STATE_MAX_AGE},
};

/// What to hand out when a refresh fails transiently and the old token has not expired yet.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StaleTokenPolicy {
	/// Surface the transient error.
	#[default]
	Refuse,
	/// Return the stale token with a warning so the caller can try it anyway.
	AttemptStale,
}
impl FromStr for StaleTokenPolicy {
	type Err = ConfigError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.trim().to_ascii_lowercase().as_str() {
			"refuse" => Ok(Self::Refuse),
			"attempt_stale" | "attempt-stale" => Ok(Self::AttemptStale),
			other => Err(ConfigError::InvalidSetting {
				name: "stale_token_policy",
				reason: format!("unknown policy `{other}`"),
			}),
		}
	}
}

/// Manager settings.
#[derive(Clone, Debug, Deserialize)]
pub struct Config {
	/// Secret the token cipher and state-signing keys are derived from.
	pub encryption_secret: Secret,
	/// Base URL the provider redirects back to after re-authorization.
	#[serde(default = "default_redirect_base")]
	pub redirect_base: String,
	/// Google OAuth client id (shared by GA4 and Google Ads).
	#[serde(default)]
	pub google_client_id: Option<String>,
	/// Google OAuth client secret.
	#[serde(default)]
	pub google_client_secret: Option<Secret>,
	/// Google Ads developer token.
	#[serde(default)]
	pub google_ads_developer_token: Option<Secret>,
	/// Facebook app id.
	#[serde(default)]
	pub facebook_app_id: Option<String>,
	/// Facebook app secret.
	#[serde(default)]
	pub facebook_app_secret: Option<Secret>,
	/// Graph API version segment, e.g. `v18.0`.
	#[serde(default = "default_facebook_api_version")]
	pub facebook_api_version: String,
	/// Seconds before expiry at which a token already counts as stale.
	#[serde(default = "default_refresh_buffer_secs")]
	pub refresh_buffer_secs: u64,
	/// Consecutive failures after which `should_retry` answers `false`.
	#[serde(default = "default_max_failures")]
	pub max_failures: u32,
	/// Upper bound for one provider call, in seconds.
	#[serde(default = "default_request_timeout_secs")]
	pub request_timeout_secs: u64,
	/// How long a re-authorization `state` stays valid, in seconds.
	#[serde(default = "default_reauth_state_max_age_secs")]
	pub reauth_state_max_age_secs: u64,
	/// Behavior on transient refresh failures.
	#[serde(default)]
	pub stale_token_policy: StaleTokenPolicy,
}
impl Config {
	/// Creates a configuration with defaults for everything but the secret.
	pub fn new(encryption_secret: impl Into<Secret>) -> Result<Self, ConfigError> {
		let encryption_secret = encryption_secret.into();

		if encryption_secret.is_empty() {
			return Err(ConfigError::EmptySecret);
		}

		Ok(Self {
			encryption_secret,
			redirect_base: default_redirect_base(),
			google_client_id: None,
			google_client_secret: None,
			google_ads_developer_token: None,
			facebook_app_id: None,
			facebook_app_secret: None,
			facebook_api_version: default_facebook_api_version(),
			refresh_buffer_secs: default_refresh_buffer_secs(),
			max_failures: default_max_failures(),
			request_timeout_secs: default_request_timeout_secs(),
			reauth_state_max_age_secs: default_reauth_state_max_age_secs(),
			stale_token_policy: StaleTokenPolicy::default(),
		})
	}

	/// Loads settings from the process environment.
	pub fn from_env() -> Result<Self, ConfigError> {
		Self::from_lookup(|name| std::env::var(name).ok())
	}

	/// Loads settings through an arbitrary key lookup; blank values count as absent.
	pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
	where
		F: Fn(&str) -> Option<String>,
	{
		let get = |name: &str| lookup(name).map(|v| v.trim().to_owned()).filter(|v| !v.is_empty());
		let secret = get("ANALYTICS_TOKEN_ENCRYPTION_KEY")
			.ok_or(ConfigError::MissingSetting { name: "ANALYTICS_TOKEN_ENCRYPTION_KEY" })?;
		let mut config = Self::new(secret)?;

		if let Some(raw) = get("FRONTEND_URL") {
			config.redirect_base = raw;
			config.redirect_base_url().map_err(|e| ConfigError::InvalidSetting {
				name: "FRONTEND_URL",
				reason: e.to_string(),
			})?;
		}

		config.google_client_id = get("GOOGLE_CLIENT_ID");
		config.google_client_secret = get("GOOGLE_CLIENT_SECRET").map(Secret::from);
		config.google_ads_developer_token = get("GOOGLE_ADS_DEVELOPER_TOKEN")
			.or_else(|| get("GOOGLE_DEVELOPER_TOKEN"))
			.map(Secret::from);
		config.facebook_app_id = get("FACEBOOK_APP_ID");
		config.facebook_app_secret = get("FACEBOOK_APP_SECRET").map(Secret::from);

		if let Some(version) = get("FACEBOOK_API_VERSION") {
			config.facebook_api_version = version;
		}
		if let Some(raw) = get("ADGRANT_REFRESH_BUFFER_SECS") {
			config.refresh_buffer_secs = parse_setting("ADGRANT_REFRESH_BUFFER_SECS", &raw)?;
		}
		if let Some(raw) = get("ADGRANT_MAX_FAILURES") {
			config.max_failures = parse_setting("ADGRANT_MAX_FAILURES", &raw)?;
		}
		if let Some(raw) = get("ADGRANT_REQUEST_TIMEOUT_SECS") {
			config.request_timeout_secs = parse_setting("ADGRANT_REQUEST_TIMEOUT_SECS", &raw)?;
		}
		if let Some(raw) = get("ADGRANT_REAUTH_STATE_MAX_AGE_SECS") {
			config.reauth_state_max_age_secs =
				parse_setting("ADGRANT_REAUTH_STATE_MAX_AGE_SECS", &raw)?;
		}
		if let Some(raw) = get("ADGRANT_STALE_TOKEN_POLICY") {
			config.stale_token_policy = raw.parse()?;
		}

		Ok(config)
	}

	/// Parsed [`redirect_base`](Self::redirect_base).
	pub fn redirect_base_url(&self) -> Result<Url, ConfigError> {
		Url::parse(&self.redirect_base).map_err(|e| ConfigError::InvalidSetting {
			name: "redirect_base",
			reason: e.to_string(),
		})
	}

	/// Google client credentials (GA4 and Google Ads).
	pub fn google_credentials(&self) -> ClientCredentials {
		ClientCredentials {
			client_id: self.google_client_id.clone(),
			client_secret: self.google_client_secret.clone(),
		}
	}

	/// Facebook app credentials.
	pub fn facebook_credentials(&self) -> ClientCredentials {
		ClientCredentials {
			client_id: self.facebook_app_id.clone(),
			client_secret: self.facebook_app_secret.clone(),
		}
	}

	/// Refresh buffer as a [`Duration`].
	pub fn refresh_buffer(&self) -> Duration {
		seconds(self.refresh_buffer_secs)
	}

	/// Provider call timeout as a [`Duration`].
	pub fn request_timeout(&self) -> Duration {
		seconds(self.request_timeout_secs)
	}

	/// Re-authorization `state` lifetime as a [`Duration`].
	pub fn reauth_state_max_age(&self) -> Duration {
		seconds(self.reauth_state_max_age_secs)
	}
}

fn parse_setting<T>(name: &'static str, raw: &str) -> Result<T, ConfigError>
where
	T: FromStr,
	T::Err: Display,
{
	raw.parse().map_err(|e: T::Err| ConfigError::InvalidSetting { name, reason: e.to_string() })
}

fn seconds(secs: u64) -> Duration {
	Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX))
}

fn default_redirect_base() -> String {
	DEFAULT_REDIRECT_BASE.into()
}

fn default_facebook_api_version() -> String {
	facebook::DEFAULT_API_VERSION.into()
}

fn default_refresh_buffer_secs() -> u64 {
	DEFAULT_REFRESH_BUFFER.whole_seconds().unsigned_abs()
}

fn default_max_failures() -> u32 {
	DEFAULT_MAX_FAILURES
}

fn default_request_timeout_secs() -> u64 {
	DEFAULT_REQUEST_TIMEOUT.whole_seconds().unsigned_abs()
}

fn default_reauth_state_max_age_secs() -> u64 {
	DEFAULT_STATE_MAX_AGE.whole_seconds().unsigned_abs()
}
