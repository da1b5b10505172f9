//! Failure and success bookkeeping for connections.
//!
//! Writes go through [`store::update`], so concurrent trackers (or other processes sharing
//! the store) never lose increments.

// self
use crate::{
	_prelude::*,
	auth::ConnectionId,
	clock::Clock,
	connection::Connection,
	provider::FailureClass,
	store::{self, ConnectionStore},
};

/// Failures tolerated before callers should stop retrying silently.
pub const DEFAULT_MAX_FAILURES: u32 = 3;

const REFRESH_PREFIX: &str = "token_refresh_failed: ";

/// Classified failure reason stored on a connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FailureReason(String);
impl FailureReason {
	/// Recovers the refresh class from a stored reason, if it was written by [`Self::refresh`].
	pub fn refresh_class(stored: &str) -> Option<FailureClass> {
		let label = stored.strip_prefix(REFRESH_PREFIX)?;

		FailureClass::ALL.into_iter().find(|class| class.as_str() == label)
	}

	/// Reason recorded for a failed refresh of the given class.
	pub fn refresh(class: FailureClass) -> Self {
		Self(format!("{REFRESH_PREFIX}{class}"))
	}

	/// Reason recorded when stored ciphertext cannot be opened.
	pub fn decryption() -> Self {
		Self("decryption_failed".into())
	}

	/// Free-form reason reported by an external caller (e.g. a data fetch that got a 401).
	pub fn external(reason: impl Into<String>) -> Self {
		Self(reason.into())
	}

	/// Reason text.
	pub fn as_str(&self) -> &str {
		&self.0
	}
}
impl Display for FailureReason {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(&self.0)
	}
}

/// Records failures and successes against stored connections.
#[derive(Clone)]
pub struct FailureTracker {
	store: Arc<dyn ConnectionStore>,
	clock: Arc<dyn Clock>,
}
impl FailureTracker {
	/// Creates a tracker over `store`.
	pub fn new(store: Arc<dyn ConnectionStore>, clock: Arc<dyn Clock>) -> Self {
		Self { store, clock }
	}

	/// Increments `failure_count`, stamps the reason and time, and optionally sets
	/// `needs_reauth`.
	pub async fn record_failure(
		&self,
		id: &ConnectionId,
		reason: &FailureReason,
		also_set_needs_reauth: bool,
	) -> Result<Connection> {
		let now = self.clock.now();

		store::update(self.store.as_ref(), id, |conn| {
			conn.note_failure(reason.as_str(), also_set_needs_reauth, now);

			Ok(())
		})
		.await
	}

	/// Clears `needs_reauth`, stamps `last_validated_at`, and optionally resets failures.
	pub async fn record_success(
		&self,
		id: &ConnectionId,
		reset_failure_count: bool,
	) -> Result<Connection> {
		let now = self.clock.now();

		store::update(self.store.as_ref(), id, |conn| {
			conn.note_success(reset_failure_count, now);

			Ok(())
		})
		.await
	}
}
impl Debug for FailureTracker {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("FailureTracker").field("clock", &self.clock).finish_non_exhaustive()
	}
}

/// Returns `true` while the connection has failed fewer than `max_failures` times.
pub fn should_retry(connection: &Connection, max_failures: u32) -> bool {
	connection.failure_count < max_failures
}
