//! Registration, external token application, bookkeeping, and selection.

// self
use super::ConnectionManager;
use crate::{
	_prelude::*,
	auth::{ConnectionId, ScopeSet, Secret},
	connection::{Connection, ConnectionFilter, OwnerRef, Provider},
	error::ConfigError,
	expiry,
	failure::{self, FailureReason},
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
	reauth::StateError,
	store,
};

/// Tokens handed over by an upstream authorization-code exchange.
#[derive(Clone, Debug)]
pub struct NewConnection {
	/// Identifier to use; a random one is generated when absent.
	pub id: Option<ConnectionId>,
	/// Owning customer and operator.
	pub owner: OwnerRef,
	/// Provider the tokens belong to.
	pub provider: Provider,
	/// Provider account, used as `login_hint` during re-authorization.
	pub account_email: Option<String>,
	/// Granted scopes.
	pub scopes: ScopeSet,
	/// Access token.
	pub access_token: Secret,
	/// Refresh token, when issued.
	pub refresh_token: Option<Secret>,
	/// Lifetime in seconds, when reported.
	pub expires_in: Option<i64>,
}
impl NewConnection {
	/// Creates a registration request with no scopes, refresh token, or expiry.
	pub fn new(owner: OwnerRef, provider: Provider, access_token: impl Into<Secret>) -> Self {
		Self {
			id: None,
			owner,
			provider,
			account_email: None,
			scopes: ScopeSet::default(),
			access_token: access_token.into(),
			refresh_token: None,
			expires_in: None,
		}
	}

	/// Uses a caller-chosen identifier.
	pub fn with_id(mut self, id: ConnectionId) -> Self {
		self.id = Some(id);

		self
	}

	/// Sets the provider account hint.
	pub fn with_account_email(mut self, email: impl Into<String>) -> Self {
		self.account_email = Some(email.into());

		self
	}

	/// Sets the granted scopes.
	pub fn with_scopes(mut self, scopes: ScopeSet) -> Self {
		self.scopes = scopes;

		self
	}

	/// Sets the refresh token.
	pub fn with_refresh_token(mut self, refresh_token: impl Into<Secret>) -> Self {
		self.refresh_token = Some(refresh_token.into());

		self
	}

	/// Sets the reported lifetime in seconds.
	pub fn with_expires_in(mut self, expires_in: i64) -> Self {
		self.expires_in = Some(expires_in);

		self
	}
}

impl ConnectionManager {
	/// Stores a new connection with sealed tokens.
	///
	/// Re-registering an existing id replaces the record and bumps its version so in-flight
	/// refreshes of the old grant lose their conditional write. Revoked ids stay revoked and
	/// fail with [`Error::Revoked`].
	pub async fn register(&self, new: NewConnection) -> Result<Connection> {
		let id = new.id.clone().unwrap_or_else(ConnectionId::generate);
		let span = FlowSpan::new(FlowKind::Register, "register", &id);

		span.instrument(async move {
			let now = self.clock.now();
			let access_token_enc = self
				.cipher
				.encrypt(Some(new.access_token.expose()))?
				.ok_or(ConfigError::InvalidSetting {
					name: "access_token",
					reason: "must not be empty".into(),
				})?;
			let mut connection = Connection::new(id.clone(), new.owner, new.provider, now);

			connection.account_email = new.account_email;
			connection.scopes = new.scopes;
			connection.access_token_enc = Some(access_token_enc);
			connection.refresh_token_enc =
				self.cipher.encrypt(new.refresh_token.as_ref().map(Secret::expose))?;
			connection.expires_at = Some(now + expiry::lifetime_from_secs(new.expires_in));
			connection.last_validated_at = Some(now);

			if let Some(existing) = self.store.fetch(&id).await? {
				reject_revoked(&existing)?;

				connection.version = existing.version + 1;
			}

			self.store.save(connection.clone()).await?;

			obs::record_flow_outcome(FlowKind::Register, FlowOutcome::Success);
			trace_event!(
				info,
				connection = %connection.id,
				provider = %connection.provider,
				customer = %connection.owner.customer,
				"registered connection"
			);

			Ok(connection)
		})
		.await
	}

	/// Fetches a connection, revoked or not.
	pub async fn connection(&self, id: &ConnectionId) -> Result<Connection> {
		self.store.fetch(id).await?.ok_or_else(|| Error::NotFound { id: id.clone() })
	}

	/// Soft-deletes a connection. Idempotent.
	pub async fn revoke(&self, id: &ConnectionId) -> Result<Connection> {
		let span = FlowSpan::new(FlowKind::Revoke, "revoke", id);
		let revoked = span
			.instrument(store::update(self.store.as_ref(), id, |connection| {
				connection.revoked = true;

				Ok(())
			}))
			.await?;

		obs::record_flow_outcome(FlowKind::Revoke, FlowOutcome::Success);
		trace_event!(info, connection = %id, "revoked connection");

		Ok(revoked)
	}

	/// Stamps `last_used_at`.
	pub async fn mark_used(&self, id: &ConnectionId) -> Result<Connection> {
		let now = self.clock.now();

		store::update(self.store.as_ref(), id, |connection| {
			reject_revoked(connection)?;

			connection.last_used_at = Some(now);

			Ok(())
		})
		.await
	}

	/// Records a failure observed by a downstream API caller.
	///
	/// The failure counts toward [`should_retry`](Self::should_retry) but never sets
	/// `needs_reauth`; only refresh classification does.
	pub async fn record_external_failure(
		&self,
		id: &ConnectionId,
		reason: impl Into<String>,
	) -> Result<Connection> {
		const KIND: FlowKind = FlowKind::RecordFailure;

		let reason = FailureReason::external(reason);
		let span = FlowSpan::new(KIND, "record_external_failure", id);

		span.instrument(async {
			self.load_active(id).await?;

			let recorded = self.tracker.record_failure(id, &reason, false).await?;

			obs::record_flow_outcome(KIND, FlowOutcome::Success);
			trace_event!(
				warn,
				connection = %id,
				reason = %reason,
				failure_count = recorded.failure_count,
				"recorded external failure"
			);

			Ok(recorded)
		})
		.await
	}

	/// Records a successful downstream call, optionally clearing the failure fields.
	pub async fn record_success(
		&self,
		id: &ConnectionId,
		reset_failure_count: bool,
	) -> Result<Connection> {
		self.load_active(id).await?;
		self.tracker.record_success(id, reset_failure_count).await
	}

	/// Replaces the tokens with ones obtained outside the refresh path (OAuth callback).
	///
	/// This is the only way out of `needs_reauth`: the flag and the failure fields are cleared.
	/// An absent `refresh_token` keeps the stored one.
	pub async fn apply_fresh_tokens(
		&self,
		id: &ConnectionId,
		access_token: &Secret,
		refresh_token: Option<&Secret>,
		expires_in: Option<i64>,
	) -> Result<Connection> {
		const KIND: FlowKind = FlowKind::ApplyTokens;

		let span = FlowSpan::new(KIND, "apply_fresh_tokens", id);

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let result = span
			.instrument(async {
				let access_token_enc = self.cipher.encrypt(Some(access_token.expose()))?.ok_or(
					ConfigError::InvalidSetting {
						name: "access_token",
						reason: "must not be empty".into(),
					},
				)?;
				let refresh_token_enc = self
					.cipher
					.encrypt(refresh_token.filter(|t| !t.is_empty()).map(Secret::expose))?;
				let now = self.clock.now();
				let expires_at = now + expiry::lifetime_from_secs(expires_in);

				store::update(self.store.as_ref(), id, |connection| {
					reject_revoked(connection)?;

					connection.access_token_enc = Some(access_token_enc.clone());

					if let Some(sealed) = &refresh_token_enc {
						connection.refresh_token_enc = Some(sealed.clone());
					}

					connection.expires_at = Some(expires_at);
					connection.rotated_at = Some(now);
					connection.note_success(true, now);

					Ok(())
				})
				.await
			})
			.await;

		match &result {
			Ok(_) => {
				obs::record_flow_outcome(KIND, FlowOutcome::Success);
				trace_event!(info, connection = %id, "applied fresh tokens");
			},
			Err(_) => obs::record_flow_outcome(KIND, FlowOutcome::Failure),
		}

		result
	}

	/// Builds the provider consent URL for `id`. Performs no writes.
	pub async fn reauth_url(&self, id: &ConnectionId) -> Result<Url> {
		let connection = self.load_active(id).await?;

		obs::record_flow_outcome(FlowKind::Reauth, FlowOutcome::Attempt);

		self.build_reauth_url(&connection)
	}

	/// Checks a `state` returned to the callback and yields the connection it is bound to.
	pub fn verify_reauth_state(&self, state: &str) -> Result<ConnectionId, StateError> {
		let verified = self.escalator.verify_state(state, self.clock.now(), self.state_max_age);

		obs::record_flow_outcome(
			FlowKind::Reauth,
			if verified.is_ok() { FlowOutcome::Success } else { FlowOutcome::Failure },
		);

		verified
	}

	/// Lists non-revoked connections with at least one recorded failure (or the filter's own
	/// minimum), for alerting and re-authorization campaigns.
	pub async fn failing_connections(&self, filter: &ConnectionFilter) -> Result<Vec<Connection>> {
		let mut filter = filter.clone();

		if filter.min_failure_count.is_none() && filter.needs_reauth.is_none() {
			filter.min_failure_count = Some(1);
		}

		Ok(self.store.list_active(&filter).await?)
	}

	/// Returns `true` while the connection is below the configured failure ceiling.
	pub fn should_retry(&self, connection: &Connection) -> bool {
		failure::should_retry(connection, self.max_failures)
	}

	pub(super) fn build_reauth_url(&self, connection: &Connection) -> Result<Url> {
		let adapter = self.adapter(connection.provider)?;

		Ok(self.escalator.build_reauth_url(
			adapter.as_ref(),
			&connection.id,
			connection.account_email.as_deref(),
			self.clock.now(),
		)?)
	}
}

fn reject_revoked(connection: &Connection) -> Result<()> {
	if connection.revoked {
		return Err(Error::Revoked { id: connection.id.clone() });
	}

	Ok(())
}
