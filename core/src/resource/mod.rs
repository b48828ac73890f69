//! Flat blob storage for workspace resources
//!
//! Every resource lives at `resources/<id>`. Ids come from a monotonic counter
//! persisted in the workspace `index` file; the counter is written before the
//! blob, so a crash can leave an orphan blob or a burned id, never a reused id.
//!
//! Overwrites are copy-on-write: new bytes go to a temporary sibling that is
//! renamed over the blob. Readers holding an open stream keep seeing the old
//! bytes and a reader never observes a partially written blob.

use std::{
	fmt,
	path::{Path, PathBuf},
};

use binspect_utils::error::FileIOError;
use serde::{Deserialize, Serialize};
use tokio::{fs, io::AsyncWriteExt, sync::Mutex};
use tracing::{debug, info, instrument, trace};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Identifier of a stored blob, always positive
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(u64);

impl ResourceId {
	pub fn new(raw: u64) -> Option<Self> {
		(raw > 0).then_some(Self(raw))
	}

	pub const fn get(self) -> u64 {
		self.0
	}
}

impl fmt::Display for ResourceId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// Persisted counter state
#[derive(Debug, Default, Serialize, Deserialize)]
struct IndexState {
	last_allocated: u64,
}

pub struct ResourceStore {
	resources_dir: PathBuf,
	index_path: PathBuf,
	/// Last allocated id, guarded so increment and persist happen together
	counter: Mutex<u64>,
}

impl ResourceStore {
	/// Open (or initialise) the store rooted at the given paths
	pub async fn open(resources_dir: impl AsRef<Path>, index_path: impl AsRef<Path>) -> Result<Self> {
		let resources_dir = resources_dir.as_ref().to_path_buf();
		let index_path = index_path.as_ref().to_path_buf();

		fs::create_dir_all(&resources_dir)
			.await
			.map_err(|e| FileIOError::from_std_io_err(&resources_dir, e))?;

		let state = match fs::read(&index_path).await {
			Ok(bytes) => rmp_serde::from_slice::<IndexState>(&bytes)
				.map_err(|e| Error::CorruptedIndex(e.to_string()))?,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => IndexState::default(),
			Err(e) => return Err(FileIOError::from_std_io_err(&index_path, e).into()),
		};

		info!(
			last_allocated = state.last_allocated,
			"Opened resource store at {:?}", resources_dir
		);

		Ok(Self {
			resources_dir,
			index_path,
			counter: Mutex::new(state.last_allocated),
		})
	}

	pub fn path_of(&self, id: ResourceId) -> PathBuf {
		self.resources_dir.join(id.to_string())
	}

	/// Store a new blob, returning its freshly allocated id
	#[instrument(skip(self, bytes), fields(len = bytes.len()), err)]
	pub async fn allocate(&self, bytes: &[u8]) -> Result<ResourceId> {
		let id = {
			let mut last = self.counter.lock().await;
			let next = *last + 1;
			self.persist_counter(next).await?;
			*last = next;
			ResourceId(next)
		};

		let path = self.path_of(id);
		write_file(&path, bytes).await?;

		debug!(%id, "Allocated resource");
		Ok(id)
	}

	/// Open a blob for streaming reads
	pub async fn read(&self, id: ResourceId) -> Result<fs::File> {
		let path = self.path_of(id);
		fs::File::open(&path)
			.await
			.map_err(|e| not_found_or_io(id, &path, e))
	}

	/// Read a whole blob into memory
	pub async fn read_bytes(&self, id: ResourceId) -> Result<Vec<u8>> {
		let path = self.path_of(id);
		fs::read(&path)
			.await
			.map_err(|e| not_found_or_io(id, &path, e))
	}

	pub async fn exists(&self, id: ResourceId) -> Result<bool> {
		let path = self.path_of(id);
		fs::try_exists(&path)
			.await
			.map_err(|e| FileIOError::from_std_io_err(&path, e).into())
	}

	/// Replace the content of an existing blob
	#[instrument(skip(self, bytes), fields(len = bytes.len()), err)]
	pub async fn overwrite(&self, id: ResourceId, bytes: &[u8]) -> Result<()> {
		let path = self.path_of(id);
		if !self.exists(id).await? {
			return Err(Error::ResourceNotFound(id));
		}

		let tmp_path = self
			.resources_dir
			.join(format!(".{id}.{}.tmp", Uuid::new_v4().simple()));
		write_file(&tmp_path, bytes).await?;

		if let Err(e) = fs::rename(&tmp_path, &path).await {
			let _ = fs::remove_file(&tmp_path).await;
			return Err(FileIOError::from_std_io_err_with_msg(
				&path,
				e,
				"replacing resource content",
			)
			.into());
		}

		trace!(%id, "Overwrote resource");
		Ok(())
	}

	#[instrument(skip(self), err)]
	pub async fn delete(&self, id: ResourceId) -> Result<()> {
		let path = self.path_of(id);
		fs::remove_file(&path)
			.await
			.map_err(|e| not_found_or_io(id, &path, e))?;

		debug!(%id, "Deleted resource");
		Ok(())
	}

	async fn persist_counter(&self, last_allocated: u64) -> Result<()> {
		let bytes = rmp_serde::to_vec_named(&IndexState { last_allocated })
			.map_err(|e| Error::CorruptedIndex(e.to_string()))?;

		let tmp_path = self.index_path.with_extension("tmp");
		write_file(&tmp_path, &bytes).await?;
		fs::rename(&tmp_path, &self.index_path)
			.await
			.map_err(|e| FileIOError::from_std_io_err(&self.index_path, e))?;

		Ok(())
	}
}

async fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
	let mut file = fs::File::create(path)
		.await
		.map_err(|e| FileIOError::from_std_io_err(path, e))?;
	file.write_all(bytes)
		.await
		.map_err(|e| FileIOError::from_std_io_err(path, e))?;
	file.sync_all()
		.await
		.map_err(|e| FileIOError::from_std_io_err(path, e))?;

	Ok(())
}

fn not_found_or_io(id: ResourceId, path: &Path, e: std::io::Error) -> Error {
	if e.kind() == std::io::ErrorKind::NotFound {
		Error::ResourceNotFound(id)
	} else {
		FileIOError::from_std_io_err(path, e).into()
	}
}
