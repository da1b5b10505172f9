//! Re-authorization URLs for connections that can no longer refresh on their own.
//!
//! The escalator builds the provider's consent URL with the full default scope list,
//! `access_type=offline` and `prompt=consent` (so a new refresh token is issued), and an
//! HMAC-signed `state` that binds the round trip to one connection:
//!
//! ```text
//! base64url(connection_id | issued_at_unix | nonce_hex) . base64url(HMAC-SHA256)
//! ```

// crates.io
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
// self
use crate::{
	_prelude::*,
	auth::{ConnectionId, Secret},
	cipher::{self, STATE_KEY_INFO},
	connection::Provider,
	error::ConfigError,
	provider::ProviderAdapter,
};

type HmacSha256 = Hmac<Sha256>;

/// Redirect base used when none is configured.
pub const DEFAULT_REDIRECT_BASE: &str = "https://localhost:3000";
/// Age after which a `state` value is no longer accepted.
pub const DEFAULT_STATE_MAX_AGE: Duration = Duration::hours(1);

/// Raised when a returned `state` cannot be trusted.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum StateError {
	/// The value does not follow the signed layout.
	#[error("Re-authorization state is malformed.")]
	Malformed,
	/// The signature does not match.
	#[error("Re-authorization state signature is invalid.")]
	BadSignature,
	/// The value is older than the accepted window (or issued in the future).
	#[error("Re-authorization state has expired.")]
	Expired,
}

/// Builds provider consent URLs and signs/verifies their `state` parameter.
pub struct ReauthEscalator {
	redirect_base: Url,
	mac: HmacSha256,
}
impl ReauthEscalator {
	/// Derives the state-signing key from `secret` (distinct from the token cipher key).
	pub fn new(secret: &Secret, redirect_base: Url) -> Result<Self, ConfigError> {
		let key = cipher::derive_key(secret, STATE_KEY_INFO)?;
		let mac = <HmacSha256 as Mac>::new_from_slice(key.as_slice())
			.map_err(|e| ConfigError::InvalidSetting { name: "state_key", reason: e.to_string() })?;

		Ok(Self { redirect_base, mac })
	}

	/// Callback the provider redirects to: `{redirect_base}/auth/{slug}-callback`.
	pub fn redirect_uri(&self, provider: Provider) -> Result<Url, ConfigError> {
		let base = self.redirect_base.as_str().trim_end_matches('/');

		Url::parse(&format!("{base}/auth/{}-callback", provider.callback_slug()))
			.map_err(|source| ConfigError::InvalidDescriptor { source })
	}

	/// Builds the consent URL for `connection_id`. Performs no I/O.
	pub fn build_reauth_url(
		&self,
		adapter: &dyn ProviderAdapter,
		connection_id: &ConnectionId,
		account_hint: Option<&str>,
		now: OffsetDateTime,
	) -> Result<Url, ConfigError> {
		let descriptor = adapter.descriptor();
		let delimiter = descriptor.quirks.scope_delimiter.to_string();
		let scope = adapter.default_scopes().join(&delimiter);
		let redirect_uri = self.redirect_uri(adapter.provider())?;
		let state = self.sign_state(connection_id, now);
		let mut url = descriptor.endpoints.authorization.clone();

		{
			let mut query = url.query_pairs_mut();

			query
				.append_pair("client_id", adapter.client_id()?)
				.append_pair("redirect_uri", redirect_uri.as_str())
				.append_pair("response_type", "code")
				.append_pair("scope", &scope)
				.append_pair("access_type", "offline")
				.append_pair("prompt", "consent")
				.append_pair("include_granted_scopes", "true");

			if let Some(hint) = account_hint.filter(|h| !h.is_empty()) {
				query.append_pair("login_hint", hint);
			}

			query.append_pair("state", &state);
		}

		Ok(url)
	}

	/// Signs a fresh `state` for `connection_id`.
	pub fn sign_state(&self, connection_id: &ConnectionId, issued_at: OffsetDateTime) -> String {
		let mut nonce = [0_u8; 12];

		rand::rng().fill_bytes(&mut nonce);

		let nonce_hex = nonce.iter().map(|b| format!("{b:02x}")).collect::<String>();
		let payload = format!("{connection_id}|{}|{nonce_hex}", issued_at.unix_timestamp());
		let signature = self.mac().chain_update(payload.as_bytes()).finalize().into_bytes();

		format!("{}.{}", URL_SAFE_NO_PAD.encode(payload), URL_SAFE_NO_PAD.encode(signature))
	}

	/// Verifies a returned `state` and yields the connection it was issued for.
	pub fn verify_state(
		&self,
		state: &str,
		now: OffsetDateTime,
		max_age: Duration,
	) -> Result<ConnectionId, StateError> {
		let (payload_b64, signature_b64) = state.split_once('.').ok_or(StateError::Malformed)?;
		let payload = URL_SAFE_NO_PAD.decode(payload_b64).map_err(|_| StateError::Malformed)?;
		let signature = URL_SAFE_NO_PAD.decode(signature_b64).map_err(|_| StateError::Malformed)?;

		self.mac()
			.chain_update(&payload)
			.verify_slice(&signature)
			.map_err(|_| StateError::BadSignature)?;

		let payload = String::from_utf8(payload).map_err(|_| StateError::Malformed)?;
		let mut parts = payload.split('|');
		let (Some(id), Some(issued_at), Some(_nonce), None) =
			(parts.next(), parts.next(), parts.next(), parts.next())
		else {
			return Err(StateError::Malformed);
		};
		let issued_at = issued_at
			.parse::<i64>()
			.ok()
			.and_then(|secs| OffsetDateTime::from_unix_timestamp(secs).ok())
			.ok_or(StateError::Malformed)?;
		let age = now - issued_at;

		if age.is_negative() || age > max_age {
			return Err(StateError::Expired);
		}

		ConnectionId::new(id).map_err(|_| StateError::Malformed)
	}

	fn mac(&self) -> HmacSha256 {
		self.mac.clone()
	}
}
impl Debug for ReauthEscalator {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ReauthEscalator")
			.field("redirect_base", &self.redirect_base.as_str())
			.finish_non_exhaustive()
	}
}
