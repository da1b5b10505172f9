//! Per-connection singleflight guards for token refresh.
//!
//! [`RefreshCoordinator::with_refresh_lock`] serializes refreshes for one connection inside
//! this process. After acquiring the guard it re-reads the record, so callers that queued
//! behind a refresh observe its result (the new token, or the failure it recorded) instead of
//! calling the provider again.

mod metrics;

pub use metrics::RefreshMetrics;

// self
use crate::{
	_prelude::*,
	auth::ConnectionId,
	clock::Clock,
	connection::Connection,
	expiry::ExpiryPolicy,
	store::ConnectionStore,
};

type GuardMap = Mutex<HashMap<ConnectionId, Arc<AsyncMutex<()>>>>;

/// Result of running work under a connection's refresh guard.
#[derive(Debug)]
pub enum LockOutcome<T> {
	/// Another holder refreshed the record while this caller waited; the work did not run.
	AlreadyUsable(Connection),
	/// A failure was recorded on the record while this caller waited; the work did not run.
	FailedWhileWaiting(Connection),
	/// The work ran against the freshly re-read record.
	Ran(T),
}

/// What a caller saw before queueing for the guard, and whether it insists on a refresh.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RefreshTicket {
	failure_count: u32,
	last_failure_at: Option<OffsetDateTime>,
	rotated_at: Option<OffsetDateTime>,
	force: bool,
}
impl RefreshTicket {
	/// Refreshes only when the re-read record is no longer usable.
	pub fn if_stale(observed: &Connection) -> Self {
		Self {
			failure_count: observed.failure_count,
			last_failure_at: observed.last_failure_at,
			rotated_at: observed.rotated_at,
			force: false,
		}
	}

	/// Refreshes even a usable record, unless another holder rotated it while this caller
	/// waited.
	pub fn forced(observed: &Connection) -> Self {
		Self { force: true, ..Self::if_stale(observed) }
	}

	/// Returns `true` when this ticket skips the usability check.
	pub fn is_forced(&self) -> bool {
		self.force
	}

	fn failed_since(&self, current: &Connection) -> bool {
		current.failure_count > 0
			&& (current.failure_count, current.last_failure_at)
				!= (self.failure_count, self.last_failure_at)
	}

	fn rotated_since(&self, current: &Connection) -> bool {
		current.rotated_at != self.rotated_at
	}
}

/// Lazily populated map of per-connection async mutexes.
#[derive(Debug, Default)]
pub struct RefreshCoordinator {
	guards: GuardMap,
	metrics: Arc<RefreshMetrics>,
}
impl RefreshCoordinator {
	/// Creates a coordinator with an empty guard map.
	pub fn new() -> Self {
		Self::default()
	}

	/// Shared refresh counters.
	pub fn metrics(&self) -> Arc<RefreshMetrics> {
		self.metrics.clone()
	}

	/// Number of guards currently tracked (held or awaited).
	pub fn tracked_guards(&self) -> usize {
		self.guards.lock().len()
	}

	/// Runs `work` while holding the refresh guard for `id`.
	///
	/// The record is re-read after the guard is acquired. Missing records fail with
	/// [`Error::NotFound`] and revoked ones with [`Error::Revoked`]. Records that became usable
	/// while waiting short-circuit with [`LockOutcome::AlreadyUsable`] (for forced tickets only
	/// when they were also rotated meanwhile). Records that gained a failure since `ticket` was
	/// taken short-circuit with [`LockOutcome::FailedWhileWaiting`], so one outage costs one
	/// provider call and one recorded failure.
	pub async fn with_refresh_lock<S, F, Fut, T>(
		&self,
		id: &ConnectionId,
		ticket: RefreshTicket,
		store: &S,
		clock: &dyn Clock,
		policy: &ExpiryPolicy,
		work: F,
	) -> Result<LockOutcome<T>>
	where
		S: ?Sized + ConnectionStore,
		F: FnOnce(Connection) -> Fut,
		Fut: Future<Output = Result<T>>,
	{
		let guard = self.guard(id);
		let result = {
			let _singleflight = guard.lock().await;

			self.run_locked(id, ticket, store, clock, policy, work).await
		};

		drop(guard);
		self.prune();

		result
	}

	async fn run_locked<S, F, Fut, T>(
		&self,
		id: &ConnectionId,
		ticket: RefreshTicket,
		store: &S,
		clock: &dyn Clock,
		policy: &ExpiryPolicy,
		work: F,
	) -> Result<LockOutcome<T>>
	where
		S: ?Sized + ConnectionStore,
		F: FnOnce(Connection) -> Fut,
		Fut: Future<Output = Result<T>>,
	{
		let current = store.fetch(id).await?.ok_or_else(|| Error::NotFound { id: id.clone() })?;

		if current.revoked {
			return Err(Error::Revoked { id: id.clone() });
		}
		if current.is_usable_at(clock.now(), policy)
			&& (!ticket.force || ticket.rotated_since(&current))
		{
			self.metrics.record_reuse();

			return Ok(LockOutcome::AlreadyUsable(current));
		}
		if ticket.failed_since(&current) {
			self.metrics.record_shared_failure();

			return Ok(LockOutcome::FailedWhileWaiting(current));
		}

		self.metrics.record_attempt();

		match work(current).await {
			Ok(value) => {
				self.metrics.record_success();

				Ok(LockOutcome::Ran(value))
			},
			Err(e) => {
				self.metrics.record_failure();

				Err(e)
			},
		}
	}

	fn guard(&self, id: &ConnectionId) -> Arc<AsyncMutex<()>> {
		let mut guards = self.guards.lock();

		guards.entry(id.clone()).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
	}

	// Entries referenced only by the map are idle; clones are taken under this same lock.
	fn prune(&self) {
		self.guards.lock().retain(|_, guard| Arc::strong_count(guard) > 1);
	}
}
