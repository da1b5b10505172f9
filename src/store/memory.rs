//! Thread-safe in-memory [`ConnectionStore`] implementation for local development and tests.

// self
use crate::{
	_prelude::*,
	auth::ConnectionId,
	connection::{Connection, ConnectionFilter},
	store::{CompareAndSwapOutcome, ConnectionStore, StoreFuture},
};

type StoreMap = Arc<RwLock<HashMap<ConnectionId, Connection>>>;

/// Storage backend that keeps records in-process.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore(StoreMap);
impl MemoryStore {
	/// Number of stored records, revoked ones included.
	pub fn len(&self) -> usize {
		self.0.read().len()
	}

	/// Returns `true` when nothing has been stored.
	pub fn is_empty(&self) -> bool {
		self.0.read().is_empty()
	}
}
impl ConnectionStore for MemoryStore {
	fn save(&self, connection: Connection) -> StoreFuture<'_, ()> {
		let map = self.0.clone();

		Box::pin(async move {
			map.write().insert(connection.id.clone(), connection);

			Ok(())
		})
	}

	fn fetch<'a>(&'a self, id: &'a ConnectionId) -> StoreFuture<'a, Option<Connection>> {
		Box::pin(async move { Ok(self.0.read().get(id).cloned()) })
	}

	fn compare_and_swap(
		&self,
		expected_version: u64,
		replacement: Connection,
	) -> StoreFuture<'_, CompareAndSwapOutcome> {
		Box::pin(async move {
			Ok(super::swap_in_map(&mut self.0.write(), expected_version, replacement))
		})
	}

	fn list_active<'a>(
		&'a self,
		filter: &'a ConnectionFilter,
	) -> StoreFuture<'a, Vec<Connection>> {
		Box::pin(async move { Ok(super::select_in_map(&self.0.read(), filter)) })
	}
}
