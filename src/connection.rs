//! Persisted connection records and their derived lifecycle state.

// self
use crate::{
	_prelude::*,
	auth::{ConnectionId, CustomerId, OperatorId, ScopeSet},
	cipher::SealedToken,
	expiry::ExpiryPolicy,
};

/// Advertising platform a connection authenticates against.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
	/// Google Analytics 4.
	GoogleAnalytics,
	/// Google Ads.
	GoogleAds,
	/// Facebook Marketing (Graph API).
	Facebook,
}
impl Provider {
	/// Every supported provider.
	pub const ALL: [Self; 3] = [Self::GoogleAnalytics, Self::GoogleAds, Self::Facebook];

	/// Stable snake_case name used in storage and logs.
	pub fn as_str(self) -> &'static str {
		match self {
			Self::GoogleAnalytics => "google_analytics",
			Self::GoogleAds => "google_ads",
			Self::Facebook => "facebook",
		}
	}

	/// Path segment of the re-authorization callback (`/auth/{slug}-callback`).
	pub fn callback_slug(self) -> &'static str {
		match self {
			Self::GoogleAnalytics => "ga",
			Self::GoogleAds => "google-ads",
			Self::Facebook => "facebook",
		}
	}
}
impl Display for Provider {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}
impl FromStr for Provider {
	type Err = UnknownProvider;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::ALL.into_iter().find(|p| p.as_str() == s).ok_or_else(|| UnknownProvider(s.into()))
	}
}

/// Raised when a provider name is not recognized.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
#[error("Unknown provider `{0}`.")]
pub struct UnknownProvider(pub String);

/// Ownership scoping for a connection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerRef {
	/// Customer the connection belongs to.
	pub customer: CustomerId,
	/// Operator who created the connection, if recorded.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub operator: Option<OperatorId>,
}

/// Lifecycle state derived from a record at an instant.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
	/// Access token is present and outside the refresh buffer.
	Fresh,
	/// Token must be refreshed before use.
	Stale,
	/// Automatic refresh is disabled until fresh tokens are applied.
	NeedsReauth,
	/// Connection is soft-deleted.
	Revoked,
}

/// One provider credential grant, as persisted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
	/// Stable identifier of the grant.
	pub id: ConnectionId,
	/// Ownership scoping.
	pub owner: OwnerRef,
	/// Provider the tokens belong to.
	pub provider: Provider,
	/// Provider account hint forwarded as `login_hint` during re-authorization.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub account_email: Option<String>,
	/// Granted scopes.
	#[serde(default)]
	pub scopes: ScopeSet,
	/// Sealed access token.
	#[serde(default)]
	pub access_token_enc: Option<SealedToken>,
	/// Sealed refresh token.
	#[serde(default)]
	pub refresh_token_enc: Option<SealedToken>,
	/// Access token expiry; `None` is treated as already expired.
	#[serde(default)]
	pub expires_at: Option<OffsetDateTime>,
	/// Soft-delete marker.
	#[serde(default)]
	pub revoked: bool,
	/// Last successful token rotation.
	#[serde(default)]
	pub rotated_at: Option<OffsetDateTime>,
	/// Last time a token was handed to a caller.
	#[serde(default)]
	pub last_used_at: Option<OffsetDateTime>,
	/// Last time the credential was confirmed valid by the provider.
	#[serde(default)]
	pub last_validated_at: Option<OffsetDateTime>,
	/// Automatic refresh is disabled while set.
	#[serde(default)]
	pub needs_reauth: bool,
	/// Consecutive failures since the last success.
	#[serde(default)]
	pub failure_count: u32,
	/// Last classified failure.
	#[serde(default)]
	pub failure_reason: Option<String>,
	/// Instant of the last failure.
	#[serde(default)]
	pub last_failure_at: Option<OffsetDateTime>,
	/// Creation instant.
	pub created_at: OffsetDateTime,
	/// Optimistic-concurrency counter bumped by every conditional write.
	#[serde(default)]
	pub version: u64,
}
impl Connection {
	/// Creates an empty, non-revoked record at version 0.
	pub fn new(
		id: ConnectionId,
		owner: OwnerRef,
		provider: Provider,
		created_at: OffsetDateTime,
	) -> Self {
		Self {
			id,
			owner,
			provider,
			account_email: None,
			scopes: ScopeSet::default(),
			access_token_enc: None,
			refresh_token_enc: None,
			expires_at: None,
			revoked: false,
			rotated_at: None,
			last_used_at: None,
			last_validated_at: None,
			needs_reauth: false,
			failure_count: 0,
			failure_reason: None,
			last_failure_at: None,
			created_at,
			version: 0,
		}
	}

	/// Returns `true` when the stored access token can be handed out at `now`.
	pub fn is_usable_at(&self, now: OffsetDateTime, policy: &ExpiryPolicy) -> bool {
		!self.revoked
			&& !self.needs_reauth
			&& self.access_token_enc.is_some()
			&& policy.is_usable(self.expires_at, now)
	}

	/// Derives the lifecycle state at `now`.
	pub fn state_at(&self, now: OffsetDateTime, policy: &ExpiryPolicy) -> ConnectionState {
		if self.revoked {
			ConnectionState::Revoked
		} else if self.needs_reauth {
			ConnectionState::NeedsReauth
		} else if self.is_usable_at(now, policy) {
			ConnectionState::Fresh
		} else {
			ConnectionState::Stale
		}
	}

	/// Records a failure: bumps the counter and stamps the reason.
	pub fn note_failure(&mut self, reason: &str, needs_reauth: bool, now: OffsetDateTime) {
		self.failure_count = self.failure_count.saturating_add(1);
		self.failure_reason = Some(reason.to_owned());
		self.last_failure_at = Some(now);

		if needs_reauth {
			self.needs_reauth = true;
		}
	}

	/// Records a success: clears `needs_reauth`, optionally resets the failure fields, and
	/// stamps `last_validated_at`.
	pub fn note_success(&mut self, reset_failure_count: bool, now: OffsetDateTime) {
		if reset_failure_count {
			self.failure_count = 0;
			self.failure_reason = None;
			self.last_failure_at = None;
		}

		self.needs_reauth = false;
		self.last_validated_at = Some(now);
	}
}

/// Selection filter for [`ConnectionStore::list_active`](crate::store::ConnectionStore::list_active).
///
/// Revoked connections are never selected.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConnectionFilter {
	/// Restricts the selection to one customer.
	pub customer: Option<CustomerId>,
	/// Restricts the selection to one provider.
	pub provider: Option<Provider>,
	/// Minimum `failure_count` (inclusive).
	pub min_failure_count: Option<u32>,
	/// Restricts the selection by the `needs_reauth` flag.
	pub needs_reauth: Option<bool>,
}
impl ConnectionFilter {
	/// Filter for one customer's connections.
	pub fn for_customer(customer: CustomerId) -> Self {
		Self { customer: Some(customer), ..Default::default() }
	}

	/// Adds a provider restriction.
	pub fn with_provider(mut self, provider: Provider) -> Self {
		self.provider = Some(provider);

		self
	}

	/// Adds a minimum failure count.
	pub fn with_min_failure_count(mut self, min: u32) -> Self {
		self.min_failure_count = Some(min);

		self
	}

	/// Returns `true` if the connection satisfies every restriction and is not revoked.
	pub fn matches(&self, connection: &Connection) -> bool {
		!connection.revoked
			&& self.customer.as_ref().is_none_or(|c| *c == connection.owner.customer)
			&& self.provider.is_none_or(|p| p == connection.provider)
			&& self.min_failure_count.is_none_or(|min| connection.failure_count >= min)
			&& self.needs_reauth.is_none_or(|flag| flag == connection.needs_reauth)
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros::datetime;
	// self
	use super::*;

	const NOW: OffsetDateTime = datetime!(2025-03-01 12:00 UTC);

	fn connection() -> Connection {
		Connection::new(
			ConnectionId::new("conn-1").expect("Connection fixture should be valid."),
			OwnerRef {
				customer: CustomerId::new("acme").expect("Customer fixture should be valid."),
				operator: None,
			},
			Provider::GoogleAnalytics,
			NOW,
		)
	}

	#[test]
	fn state_follows_lifecycle() {
		let policy = ExpiryPolicy::default();
		let mut conn = connection();

		assert_eq!(conn.state_at(NOW, &policy), ConnectionState::Stale);

		conn.access_token_enc = Some(SealedToken::from_bytes(vec![1]));
		conn.expires_at = Some(NOW + Duration::hours(1));

		assert_eq!(conn.state_at(NOW, &policy), ConnectionState::Fresh);
		assert_eq!(conn.state_at(NOW + Duration::minutes(56), &policy), ConnectionState::Stale);

		conn.note_failure("token_refresh_failed: invalid_grant", true, NOW);

		assert_eq!(conn.state_at(NOW, &policy), ConnectionState::NeedsReauth);

		conn.revoked = true;

		assert_eq!(conn.state_at(NOW, &policy), ConnectionState::Revoked);
	}

	#[test]
	fn failure_and_success_bookkeeping() {
		let mut conn = connection();

		conn.note_failure("token_refresh_failed: network", false, NOW);
		conn.note_failure("token_refresh_failed: quota_exceeded", false, NOW);

		assert_eq!(conn.failure_count, 2);
		assert_eq!(conn.failure_reason.as_deref(), Some("token_refresh_failed: quota_exceeded"));
		assert!(!conn.needs_reauth);

		conn.note_success(true, NOW);

		assert_eq!(conn.failure_count, 0);
		assert!(conn.failure_reason.is_none());
		assert!(conn.last_failure_at.is_none());
		assert_eq!(conn.last_validated_at, Some(NOW));
	}

	#[test]
	fn missing_failure_count_deserializes_as_zero() {
		let mut value = serde_json::to_value(connection()).expect("Connection should serialize.");

		value.as_object_mut().expect("Connection should serialize as an object.").remove("failure_count");

		let conn: Connection =
			serde_json::from_value(value).expect("Connection without counter should deserialize.");

		assert_eq!(conn.failure_count, 0);
		assert_eq!(conn.provider, Provider::GoogleAnalytics);
	}

	#[test]
	fn filter_excludes_revoked_and_applies_restrictions() {
		let mut conn = connection();

		conn.failure_count = 2;

		let filter = ConnectionFilter::for_customer(conn.owner.customer.clone())
			.with_provider(Provider::GoogleAnalytics)
			.with_min_failure_count(2);

		assert!(filter.matches(&conn));
		assert!(!filter.clone().with_min_failure_count(3).matches(&conn));
		assert!(!ConnectionFilter::default().with_provider(Provider::Facebook).matches(&conn));

		conn.revoked = true;

		assert!(!filter.matches(&conn));
	}

	#[test]
	fn provider_names_round_trip() {
		assert_eq!("google_ads".parse::<Provider>(), Ok(Provider::GoogleAds));
		assert!("tiktok".parse::<Provider>().is_err());
		assert_eq!(
			serde_json::to_string(&Provider::GoogleAnalytics).expect("Provider should serialize."),
			"\"google_analytics\""
		);
		assert_eq!(Provider::GoogleAds.callback_slug(), "google-ads");
	}
}
