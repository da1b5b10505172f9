//! File-backed [`ConnectionStore`] for single-instance deployments.

// std
use std::{
	fs::{self, File},
	io::Write,
	path::{Path, PathBuf},
};
// self
use crate::{
	_prelude::*,
	auth::ConnectionId,
	connection::{Connection, ConnectionFilter},
	store::{CompareAndSwapOutcome, ConnectionStore, StoreError, StoreFuture},
};

type Snapshot = HashMap<ConnectionId, Connection>;

/// Persists connection records to a JSON file after each mutation.
#[derive(Clone, Debug)]
pub struct FileStore {
	path: PathBuf,
	inner: Arc<RwLock<Snapshot>>,
}
impl FileStore {
	/// Opens (or creates) a store at the provided path, eagerly loading existing data.
	pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
		let path = path.into();

		ensure_parent_exists(&path)?;

		let snapshot = load_snapshot(&path)?;

		Ok(Self { path, inner: Arc::new(RwLock::new(snapshot)) })
	}

	/// Location of the JSON snapshot.
	pub fn path(&self) -> &Path {
		&self.path
	}

	fn persist_locked(&self, contents: &Snapshot) -> Result<(), StoreError> {
		ensure_parent_exists(&self.path)?;

		let mut records = contents.values().collect::<Vec<_>>();

		records.sort_by(|a, b| a.id.cmp(&b.id));

		let serialized =
			serde_json::to_vec_pretty(&records).map_err(|e| StoreError::Serialization {
				message: format!("Failed to serialize store snapshot: {e}"),
			})?;
		let mut tmp_path = self.path.clone();

		tmp_path.set_extension("tmp");

		{
			let mut file = File::create(&tmp_path).map_err(|e| StoreError::Backend {
				message: format!("Failed to create {}: {e}", tmp_path.display()),
			})?;

			file.write_all(&serialized).map_err(|e| StoreError::Backend {
				message: format!("Failed to write {}: {e}", tmp_path.display()),
			})?;
			file.sync_all().map_err(|e| StoreError::Backend {
				message: format!("Failed to sync {}: {e}", tmp_path.display()),
			})?;
		}

		fs::rename(&tmp_path, &self.path).map_err(|e| StoreError::Backend {
			message: format!("Failed to replace {}: {e}", self.path.display()),
		})
	}
}
impl ConnectionStore for FileStore {
	fn save(&self, connection: Connection) -> StoreFuture<'_, ()> {
		Box::pin(async move {
			let mut guard = self.inner.write();
			let id = connection.id.clone();
			let previous = guard.insert(id.clone(), connection);

			self.persist_locked(&guard).inspect_err(|_| restore(&mut guard, id, previous))
		})
	}

	fn fetch<'a>(&'a self, id: &'a ConnectionId) -> StoreFuture<'a, Option<Connection>> {
		Box::pin(async move { Ok(self.inner.read().get(id).cloned()) })
	}

	fn compare_and_swap(
		&self,
		expected_version: u64,
		replacement: Connection,
	) -> StoreFuture<'_, CompareAndSwapOutcome> {
		Box::pin(async move {
			let mut guard = self.inner.write();
			let id = replacement.id.clone();
			let previous = guard.get(&id).cloned();
			let outcome = super::swap_in_map(&mut guard, expected_version, replacement);

			if matches!(outcome, CompareAndSwapOutcome::Updated) {
				self.persist_locked(&guard).inspect_err(|_| restore(&mut guard, id, previous))?;
			}

			Ok(outcome)
		})
	}

	fn list_active<'a>(
		&'a self,
		filter: &'a ConnectionFilter,
	) -> StoreFuture<'a, Vec<Connection>> {
		Box::pin(async move { Ok(super::select_in_map(&self.inner.read(), filter)) })
	}
}

// Puts back the entry a failed write replaced, so memory keeps matching the file.
fn restore(snapshot: &mut Snapshot, id: ConnectionId, previous: Option<Connection>) {
	match previous {
		Some(previous) => {
			snapshot.insert(id, previous);
		},
		None => {
			snapshot.remove(&id);
		},
	}
}

fn load_snapshot(path: &Path) -> Result<Snapshot, StoreError> {
	if !path.exists() {
		return Ok(HashMap::new());
	}

	let bytes = fs::read(path).map_err(|e| StoreError::Backend {
		message: format!("Failed to read {}: {e}", path.display()),
	})?;

	if bytes.is_empty() {
		return Ok(HashMap::new());
	}

	let records: Vec<Connection> =
		serde_json::from_slice(&bytes).map_err(|e| StoreError::Serialization {
			message: format!("Failed to parse {}: {e}", path.display()),
		})?;

	Ok(records.into_iter().map(|c| (c.id.clone(), c)).collect())
}

fn ensure_parent_exists(path: &Path) -> Result<(), StoreError> {
	if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
		fs::create_dir_all(parent).map_err(|e| StoreError::Backend {
			message: format!("Failed to create store directory {}: {e}", parent.display()),
		})?;
	}

	Ok(())
}
