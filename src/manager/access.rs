//! Access-token retrieval with lazy, singleflight refresh.
//!
//! Order of checks for [`ConnectionManager::get_valid_access_token`]:
//!
//! 1. Missing or revoked records fail immediately.
//! 2. `needs_reauth` short-circuits to a re-authorization URL without touching the provider.
//! 3. A usable token is decrypted and returned.
//! 4. Otherwise the per-connection guard is taken, the record is re-read, and at most one caller
//!    performs the provider refresh; everyone else observes its result, including a failure
//!    it recorded.
//!
//! [`ConnectionManager::force_refresh`] takes the same path but skips step 3.

// self
use super::ConnectionManager;
use crate::{
	_prelude::*,
	auth::{ConnectionId, Secret},
	config::StaleTokenPolicy,
	connection::Connection,
	coordinator::{LockOutcome, RefreshTicket},
	error::{DecryptionError, TerminalError, TransientError},
	expiry,
	failure::FailureReason,
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
	provider::{FailureClass, ProviderAdapter, RefreshCredential, RefreshRequest, RefreshedTokens},
	store::CompareAndSwapOutcome,
};

/// Answer to [`ConnectionManager::get_valid_access_token`].
#[derive(Clone, Debug)]
pub enum AccessOutcome {
	/// The token can be used as is.
	Valid {
		/// Decrypted access token.
		access_token: Secret,
		/// Expiry of the token.
		expires_at: OffsetDateTime,
	},
	/// Automatic refresh is impossible; the user must consent again.
	RequiresReauth {
		/// Provider consent URL bound to the connection.
		url: Url,
		/// Recorded failure reason.
		reason: String,
	},
	/// Refresh failed temporarily; the old token is handed out under
	/// [`StaleTokenPolicy::AttemptStale`].
	StaleButAttempt {
		/// Decrypted, possibly expired, access token.
		access_token: Secret,
		/// Human-readable description of the failure.
		warning: String,
	},
}
impl AccessOutcome {
	/// Returns the token for the `Valid` and `StaleButAttempt` variants.
	pub fn access_token(&self) -> Option<&Secret> {
		match self {
			Self::Valid { access_token, .. } | Self::StaleButAttempt { access_token, .. } =>
				Some(access_token),
			Self::RequiresReauth { .. } => None,
		}
	}

	/// Returns `true` for the `RequiresReauth` variant.
	pub fn requires_reauth(&self) -> bool {
		matches!(self, Self::RequiresReauth { .. })
	}
}

impl ConnectionManager {
	/// Returns usable credentials for `id`, refreshing them first when they are stale.
	///
	/// Terminal failures (invalid or revoked grants, unreadable ciphertext) are recorded with
	/// `needs_reauth` and answered with [`AccessOutcome::RequiresReauth`]. Transient failures are
	/// recorded and surfaced as [`Error::Transient`] unless the stale-token policy says otherwise.
	pub async fn get_valid_access_token(&self, id: &ConnectionId) -> Result<AccessOutcome> {
		const KIND: FlowKind = FlowKind::AccessToken;

		let span = FlowSpan::new(KIND, "get_valid_access_token", id);

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let result = span.instrument(self.resolve_access(id, false)).await;

		record_access_outcome(KIND, &result);

		result
	}

	/// Refreshes `id` even when its token still looks valid, e.g. after the provider answered
	/// a data call with 401.
	///
	/// `needs_reauth` is honored, and callers that pile up behind one forced refresh receive
	/// its token instead of rotating again.
	pub async fn force_refresh(&self, id: &ConnectionId) -> Result<AccessOutcome> {
		const KIND: FlowKind = FlowKind::ForceRefresh;

		let span = FlowSpan::new(KIND, "force_refresh", id);

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let result = span.instrument(self.resolve_access(id, true)).await;

		record_access_outcome(KIND, &result);

		result
	}

	/// Granted scopes of `id` that fall short of the provider's full scope list.
	///
	/// A non-empty answer means data calls may be refused until the user re-authorizes with
	/// [`reauth_url`](Self::reauth_url).
	pub async fn missing_scopes(&self, id: &ConnectionId) -> Result<Vec<&'static str>> {
		let connection = self.load_active(id).await?;
		let adapter = self.adapter(connection.provider)?;

		Ok(connection.scopes.missing(adapter.default_scopes()))
	}

	async fn resolve_access(&self, id: &ConnectionId, force: bool) -> Result<AccessOutcome> {
		let connection = self.load_active(id).await?;

		if connection.needs_reauth {
			return self.escalate(&connection, sticky_reason(&connection));
		}
		if !force && connection.is_usable_at(self.clock.now(), &self.policy) {
			return self.hand_out(connection).await;
		}

		let ticket = if force {
			RefreshTicket::forced(&connection)
		} else {
			RefreshTicket::if_stale(&connection)
		};
		let adapter = self.adapter(connection.provider)?.clone();
		let locked = self
			.coordinator
			.with_refresh_lock(
				id,
				ticket,
				self.store.as_ref(),
				self.clock.as_ref(),
				&self.policy,
				|current| self.refresh_locked(adapter.as_ref(), current),
			)
			.await;

		match locked {
			Ok(LockOutcome::AlreadyUsable(current) | LockOutcome::Ran(current)) =>
				self.hand_out(current).await,
			Ok(LockOutcome::FailedWhileWaiting(current)) if current.needs_reauth =>
				self.escalate(&current, sticky_reason(&current)),
			Ok(LockOutcome::FailedWhileWaiting(current)) =>
				self.stale_fallback(&current, shared_failure(&current)),
			Err(e) if e.requires_reauth() => {
				let current = self.load_active(id).await?;

				self.escalate(&current, sticky_reason(&current))
			},
			Err(Error::Transient(e)) => self.stale_fallback(&connection, e),
			Err(e) => Err(e),
		}
	}

	/// Decrypts the access token of a usable record.
	#[cfg_attr(not(feature = "tracing"), allow(unused_variables))]
	async fn hand_out(&self, connection: Connection) -> Result<AccessOutcome> {
		let opened = connection
			.access_token_enc
			.as_ref()
			.ok_or(DecryptionError::Empty)
			.and_then(|sealed| self.cipher.decrypt(sealed));

		match (opened, connection.expires_at) {
			(Ok(access_token), Some(expires_at)) => Ok(AccessOutcome::Valid { access_token, expires_at }),
			(Ok(_), None) => Err(TransientError::new(
				FailureClass::Unknown,
				"connection has no expiry after refresh",
			)
			.into()),
			(Err(e), _) => {
				let reason = FailureReason::decryption();

				trace_event!(
					warn,
					connection = %connection.id,
					error = %e,
					"stored access token cannot be decrypted"
				);
				self.note_failure(&connection.id, &reason, true).await;

				self.escalate(&connection, reason.to_string())
			},
		}
	}

	/// Applies the stale-token policy to a transient refresh failure.
	fn stale_fallback(&self, connection: &Connection, error: TransientError) -> Result<AccessOutcome> {
		if self.stale_policy == StaleTokenPolicy::AttemptStale {
			if let Some(Ok(access_token)) =
				connection.access_token_enc.as_ref().map(|sealed| self.cipher.decrypt(sealed))
			{
				trace_event!(
					warn,
					connection = %connection.id,
					class = %error.class,
					"handing out a stale access token after a failed refresh"
				);

				return Ok(AccessOutcome::StaleButAttempt {
					access_token,
					warning: format!("refresh failed, using the previous access token: {error}"),
				});
			}
		}

		Err(error.into())
	}

	/// Runs under the per-connection guard with the freshly re-read record.
	async fn refresh_locked(
		&self,
		adapter: &dyn ProviderAdapter,
		current: Connection,
	) -> Result<Connection> {
		const KIND: FlowKind = FlowKind::Refresh;

		if current.needs_reauth {
			// Another waiter already hit a terminal failure.
			return Err(TerminalError::invalid_grant(sticky_reason(&current)).into());
		}

		let span = FlowSpan::new(KIND, "refresh_locked", &current.id);

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let result = span.instrument(self.refresh_with(adapter, &current)).await;

		match &result {
			Ok(_) => obs::record_flow_outcome(KIND, FlowOutcome::Success),
			Err(e) => {
				obs::record_flow_outcome(
					KIND,
					if e.requires_reauth() { FlowOutcome::Reauth } else { FlowOutcome::Failure },
				);
				self.note_refresh_error(adapter, &current, e).await;
			},
		}

		result
	}

	async fn refresh_with(
		&self,
		adapter: &dyn ProviderAdapter,
		current: &Connection,
	) -> Result<Connection> {
		let kind = adapter.refresh_credential();
		let sealed = match kind {
			RefreshCredential::RefreshToken => current.refresh_token_enc.as_ref(),
			RefreshCredential::AccessToken => current.access_token_enc.as_ref(),
		}
		.ok_or_else(|| TerminalError::invalid_grant(format!("no stored {}", kind.label())))?;
		let credential = self.cipher.decrypt(sealed)?;

		adapter.validate_credential_shape(&credential)?;

		let tokens = adapter
			.refresh(RefreshRequest {
				connection_id: current.id.clone(),
				credential,
				scopes: current.scopes.clone(),
			})
			.await?;

		if tokens.access_token.is_empty() {
			return Err(TransientError::new(
				FailureClass::Unknown,
				"provider returned an empty access token",
			)
			.into());
		}

		self.persist_refresh(current, tokens).await
	}

	/// Writes the refreshed pair with a versioned compare-and-swap.
	///
	/// When another writer won the race, its record is returned if usable.
	async fn persist_refresh(
		&self,
		current: &Connection,
		tokens: RefreshedTokens,
	) -> Result<Connection> {
		let now = self.clock.now();
		let mut next = current.clone();

		next.access_token_enc = self.cipher.encrypt(Some(tokens.access_token.expose()))?;

		if let Some(refresh_token) = tokens.refresh_token.as_ref().filter(|t| !t.is_empty()) {
			next.refresh_token_enc = self.cipher.encrypt(Some(refresh_token.expose()))?;
		}
		if let Some(scopes) = tokens.scopes.filter(|s| !s.is_empty()) {
			next.scopes = scopes;
		}

		next.expires_at = Some(now + expiry::lifetime_from_secs(tokens.expires_in));
		next.rotated_at = Some(now);
		next.last_used_at = Some(now);
		next.note_success(true, now);

		match self.store.compare_and_swap(current.version, next.clone()).await? {
			CompareAndSwapOutcome::Updated => {
				next.version = current.version + 1;

				trace_event!(
					info,
					connection = %next.id,
					provider = %next.provider,
					"refreshed access token"
				);

				Ok(next)
			},
			CompareAndSwapOutcome::VersionMismatch => {
				let winner = self.load_active(&current.id).await?;

				if winner.is_usable_at(now, &self.policy) {
					Ok(winner)
				} else {
					Err(TransientError::new(
						FailureClass::Unknown,
						"connection changed concurrently during refresh",
					)
					.into())
				}
			},
			CompareAndSwapOutcome::Missing => Err(Error::NotFound { id: current.id.clone() }),
		}
	}

	/// Records a classified refresh failure on the connection.
	///
	/// Configuration and storage problems are not the connection's fault and are not recorded.
	#[cfg_attr(not(feature = "tracing"), allow(unused_variables))]
	async fn note_refresh_error(
		&self,
		adapter: &dyn ProviderAdapter,
		current: &Connection,
		error: &Error,
	) {
		let (reason, needs_reauth) = match error {
			Error::Terminal(e) => (FailureReason::refresh(e.class), true),
			Error::Transient(e) => (FailureReason::refresh(e.class), false),
			Error::Decryption(_) => (FailureReason::decryption(), true),
			_ => {
				trace_event!(
					error,
					connection = %current.id,
					error = %error,
					"refresh aborted without recording a failure"
				);

				return;
			},
		};

		if let Error::Terminal(TerminalError { class, .. })
		| Error::Transient(TransientError { class, .. }) = error
		{
			obs::record_refresh_failure(adapter.provider(), *class);
		}

		trace_event!(
			warn,
			connection = %current.id,
			provider = %adapter.provider(),
			reason = %reason,
			needs_reauth,
			error = %error,
			"token refresh failed"
		);
		self.note_failure(&current.id, &reason, needs_reauth).await;
	}

	/// Best-effort failure bookkeeping; a storage error here must not mask the original one.
	#[cfg_attr(not(feature = "tracing"), allow(unused_variables))]
	async fn note_failure(
		&self,
		id: &ConnectionId,
		reason: &FailureReason,
		needs_reauth: bool,
	) {
		if let Err(e) = self.tracker.record_failure(id, reason, needs_reauth).await {
			trace_event!(error, connection = %id, error = %e, "failed to record a connection failure");
		}
	}

	/// Builds the re-authorization answer for `connection`.
	fn escalate(
		&self,
		connection: &Connection,
		reason: String,
	) -> Result<AccessOutcome> {
		let url = self.build_reauth_url(connection)?;

		trace_event!(
			info,
			connection = %connection.id,
			provider = %connection.provider,
			reason = %reason,
			"connection requires re-authorization"
		);

		Ok(AccessOutcome::RequiresReauth { url, reason })
	}
}

fn record_access_outcome(kind: FlowKind, result: &Result<AccessOutcome>) {
	match result {
		Ok(AccessOutcome::Valid { .. }) => obs::record_flow_outcome(kind, FlowOutcome::Success),
		Ok(AccessOutcome::RequiresReauth { .. }) =>
			obs::record_flow_outcome(kind, FlowOutcome::Reauth),
		Ok(AccessOutcome::StaleButAttempt { .. }) | Err(_) =>
			obs::record_flow_outcome(kind, FlowOutcome::Failure),
	}
}

/// Transient error reported to a caller that queued behind a failed refresh.
fn shared_failure(connection: &Connection) -> TransientError {
	let reason = connection.failure_reason.as_deref().unwrap_or("unknown");
	let class = FailureReason::refresh_class(reason)
		.filter(|class| !class.is_terminal())
		.unwrap_or(FailureClass::Unknown);

	TransientError::new(class, format!("refresh failed while this caller waited: {reason}"))
}

fn sticky_reason(connection: &Connection) -> String {
	connection
		.failure_reason
		.clone()
		.unwrap_or_else(|| FailureReason::refresh(FailureClass::InvalidGrant).to_string())
}
