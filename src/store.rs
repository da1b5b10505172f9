//! Persistence contract for connection records plus the built-in backends.

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

// self
use crate::{
	_prelude::*,
	auth::ConnectionId,
	connection::{Connection, ConnectionFilter},
};

/// Boxed future returned by [`ConnectionStore`] methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + 'a + Send>>;

/// Conditional writes retried this many times before giving up with [`Error::Contended`].
pub const MAX_UPDATE_ATTEMPTS: usize = 5;

/// Storage backend contract for connection records.
pub trait ConnectionStore
where
	Self: Send + Sync,
{
	/// Inserts or replaces a record unconditionally, keeping its `version` as given.
	fn save(&self, connection: Connection) -> StoreFuture<'_, ()>;

	/// Fetches a record by id, revoked or not.
	fn fetch<'a>(&'a self, id: &'a ConnectionId) -> StoreFuture<'a, Option<Connection>>;

	/// Replaces the stored record iff its `version` equals `expected_version`.
	///
	/// On success the stored copy carries `version = expected_version + 1`.
	fn compare_and_swap(
		&self,
		expected_version: u64,
		replacement: Connection,
	) -> StoreFuture<'_, CompareAndSwapOutcome>;

	/// Lists non-revoked records matching `filter`, ordered by id.
	fn list_active<'a>(
		&'a self,
		filter: &'a ConnectionFilter,
	) -> StoreFuture<'a, Vec<Connection>>;
}

/// Result of a versioned compare-and-swap attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareAndSwapOutcome {
	/// The stored version matched and the record was replaced.
	Updated,
	/// The record exists but another writer bumped its version first.
	VersionMismatch,
	/// No record exists for the replacement's id.
	Missing,
}

/// Error type produced by [`ConnectionStore`] implementations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum StoreError {
	/// Serialization failures surfaced by the backend.
	#[error("Serialization error: {message}.")]
	Serialization {
		/// Human-readable error payload.
		message: String,
	},
	/// Backend-level failure for the storage engine.
	#[error("Backend failure: {message}.")]
	Backend {
		/// Human-readable error payload.
		message: String,
	},
}

/// Applies `mutate` to the latest copy of a record and writes it back conditionally.
///
/// Lost races re-read and re-apply, up to [`MAX_UPDATE_ATTEMPTS`] times. Returns the record as
/// stored (with its bumped version). `mutate` may abort the update by returning an error.
pub async fn update<S, F>(store: &S, id: &ConnectionId, mut mutate: F) -> Result<Connection>
where
	S: ?Sized + ConnectionStore,
	F: FnMut(&mut Connection) -> Result<()>,
{
	for _ in 0..MAX_UPDATE_ATTEMPTS {
		let current = store.fetch(id).await?.ok_or_else(|| Error::NotFound { id: id.clone() })?;
		let mut next = current.clone();

		mutate(&mut next)?;

		match store.compare_and_swap(current.version, next.clone()).await? {
			CompareAndSwapOutcome::Updated => {
				next.version = current.version + 1;

				return Ok(next);
			},
			CompareAndSwapOutcome::VersionMismatch => continue,
			CompareAndSwapOutcome::Missing => return Err(Error::NotFound { id: id.clone() }),
		}
	}

	Err(Error::Contended { id: id.clone() })
}

/// Shared compare-and-swap rule for map-backed stores.
fn swap_in_map(
	map: &mut HashMap<ConnectionId, Connection>,
	expected_version: u64,
	mut replacement: Connection,
) -> CompareAndSwapOutcome {
	match map.get(&replacement.id) {
		Some(existing) if existing.version == expected_version => {
			replacement.version = expected_version + 1;

			map.insert(replacement.id.clone(), replacement);

			CompareAndSwapOutcome::Updated
		},
		Some(_) => CompareAndSwapOutcome::VersionMismatch,
		None => CompareAndSwapOutcome::Missing,
	}
}

fn select_in_map(
	map: &HashMap<ConnectionId, Connection>,
	filter: &ConnectionFilter,
) -> Vec<Connection> {
	let mut selected = map.values().filter(|c| filter.matches(c)).cloned().collect::<Vec<_>>();

	selected.sort_by(|a, b| a.id.cmp(&b.id));

	selected
}
