//! Generated views of file content
//!
//! A view is whatever a generator (disassembler, image decoder, ...) produced
//! from a file's bytes, stored as its own resource. The cache only tracks what
//! exists; the tree drops a file's views whenever its content changes or it is
//! deleted.

use std::{
	collections::{BTreeMap, HashMap},
	fmt,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::{
	error::{Error, Result},
	infra::event::Event,
	resource::ResourceId,
	tree::{FileId, FileTree},
};

/// Identifier of the generator that produced a view
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GeneratorType(String);

impl GeneratorType {
	pub fn new(id: impl Into<String>) -> Self {
		Self(id.into())
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for GeneratorType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl From<&str> for GeneratorType {
	fn from(id: &str) -> Self {
		Self::new(id)
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewEntity {
	pub file: FileId,
	pub generator: GeneratorType,
	pub media_type: String,
	pub resource_id: ResourceId,
	pub created_at: DateTime<Utc>,
}

/// Views per file, at most one per generator
#[derive(Default)]
pub(crate) struct ViewIndex {
	by_file: HashMap<FileId, BTreeMap<GeneratorType, ViewEntity>>,
}

impl ViewIndex {
	pub(crate) fn get(&self, file: FileId, generator: &GeneratorType) -> Option<&ViewEntity> {
		self.by_file.get(&file)?.get(generator)
	}

	pub(crate) fn list(&self, file: FileId) -> Vec<ViewEntity> {
		self.by_file
			.get(&file)
			.map(|views| views.values().cloned().collect())
			.unwrap_or_default()
	}

	/// Returns `false` without touching the index if the slot is taken
	pub(crate) fn insert(&mut self, view: ViewEntity) -> bool {
		let views = self.by_file.entry(view.file).or_default();
		if views.contains_key(&view.generator) {
			return false;
		}
		views.insert(view.generator.clone(), view);
		true
	}

	pub(crate) fn remove(&mut self, file: FileId, generator: &GeneratorType) -> Option<ViewEntity> {
		let views = self.by_file.get_mut(&file)?;
		let removed = views.remove(generator);
		if views.is_empty() {
			self.by_file.remove(&file);
		}
		removed
	}

	pub(crate) fn take_all(&mut self, file: FileId) -> Vec<ViewEntity> {
		self.by_file
			.remove(&file)
			.map(|views| views.into_values().collect())
			.unwrap_or_default()
	}

	pub(crate) fn all(&self) -> impl Iterator<Item = &ViewEntity> {
		self.by_file.values().flat_map(BTreeMap::values)
	}
}

/// Handle over the tree's view cache, see [`FileTree::views`]
pub struct ViewCache<'tree> {
	tree: &'tree FileTree,
}

impl<'tree> ViewCache<'tree> {
	pub(crate) fn new(tree: &'tree FileTree) -> Self {
		Self { tree }
	}

	/// Cached view of `file` for `generator`, if one exists
	pub async fn get(&self, file: FileId, generator: &GeneratorType) -> Option<ViewEntity> {
		self.tree
			.state
			.read()
			.await
			.views
			.get(file, generator)
			.cloned()
	}

	pub async fn list(&self, file: FileId) -> Vec<ViewEntity> {
		self.tree.state.read().await.views.list(file)
	}

	/// Store a freshly generated view. Fails if `file` already has a view from
	/// this generator; callers are expected to `get` first.
	#[instrument(skip(self, bytes), fields(len = bytes.len()), err)]
	pub async fn put(
		&self,
		file: FileId,
		generator: GeneratorType,
		media_type: &str,
		bytes: &[u8],
	) -> Result<ViewEntity> {
		let mut state = self.tree.state.write().await;
		if state.node(file)?.is_directory() {
			return Err(Error::IsDirectory(file));
		}
		if state.views.get(file, &generator).is_some() {
			return Err(Error::ViewAlreadyExists { file, generator });
		}

		let resource_id = self.tree.resources().allocate(bytes).await?;
		let view = ViewEntity {
			file,
			generator,
			media_type: media_type.to_string(),
			resource_id,
			created_at: Utc::now(),
		};
		state.views.insert(view.clone());
		state
			.channel
			.publish(Event::ViewCreated { view: view.clone() });

		debug!(%file, generator = %view.generator, %resource_id, "Cached view");
		Ok(view)
	}

	/// Drop a single view
	#[instrument(skip(self), err)]
	pub async fn remove(&self, file: FileId, generator: &GeneratorType) -> Result<()> {
		let mut state = self.tree.state.write().await;
		let resource_id = state
			.views
			.get(file, generator)
			.map(|view| view.resource_id)
			.ok_or_else(|| Error::ViewNotFound {
				file,
				generator: generator.clone(),
			})?;

		// The view stays cached until its blob is gone
		match self.tree.resources().delete(resource_id).await {
			Ok(()) | Err(Error::ResourceNotFound(_)) => {}
			Err(e) => return Err(e),
		}
		state.views.remove(file, generator);
		state.channel.publish(Event::ViewDeleted {
			file,
			generator: generator.clone(),
		});

		Ok(())
	}

	/// Drop every view of `file`, returning how many were cached
	pub async fn invalidate_all(&self, file: FileId) -> Result<usize> {
		let mut state = self.tree.state.write().await;
		state.node(file)?;
		Ok(self.tree.invalidate_views(&mut state, file).await)
	}
}
