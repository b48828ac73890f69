//! The authoritative in-memory file tree
//!
//! Nodes live in an arena keyed by [`FileId`]; a directory owns its children
//! through a name-keyed map and every node points back at its parent by id.
//! All state, including the view cache and the event channel handle, sits
//! behind one writer lock: each mutation checks, touches the resource store,
//! updates the arena and publishes its event inside a single critical section,
//! so events leave the tree in exactly the order mutations commit.

use std::{collections::BTreeMap, fmt, sync::Arc};

use binspect_utils::{error::report_error, path_segments};
use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, RwLockWriteGuard};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::{
	archive::{ArchiveTree, ArchiveType, Gate, NearestArchive},
	error::{Error, Result},
	infra::event::{Event, EventChannel},
	resource::{ResourceId, ResourceStore},
	view::{ViewCache, ViewEntity},
};

mod node;

pub(crate) use node::TreeState;
use node::{validate_name, Node, NodeContent};

/// Stable tree-local identity of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(Uuid);

impl FileId {
	#[allow(clippy::new_without_default)]
	pub fn new() -> Self {
		Self(Uuid::new_v4())
	}

	pub const fn from_uuid(uuid: Uuid) -> Self {
		Self(uuid)
	}

	pub const fn as_uuid(&self) -> &Uuid {
		&self.0
	}
}

impl fmt::Display for FileId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		self.0.fmt(f)
	}
}

/// Point-in-time view of a tree node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntity {
	pub id: FileId,
	pub name: String,
	pub parent: Option<FileId>,
	/// Optional format tag set by importers
	pub file_type: Option<String>,
	pub kind: EntityKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntityKind {
	File { resource_id: ResourceId },
	Directory { archive_type: Option<String> },
}

impl FileEntity {
	pub fn is_directory(&self) -> bool {
		matches!(self.kind, EntityKind::Directory { .. })
	}

	pub fn resource_id(&self) -> Option<ResourceId> {
		match self.kind {
			EntityKind::File { resource_id } => Some(resource_id),
			EntityKind::Directory { .. } => None,
		}
	}

	/// Identifier of the archive type bound to this directory
	pub fn archive_type(&self) -> Option<&str> {
		match &self.kind {
			EntityKind::Directory { archive_type } => archive_type.as_deref(),
			EntityKind::File { .. } => None,
		}
	}
}

/// A persisted node handed back to [`FileTree::restore`]
pub struct RestoredNode {
	pub entity: FileEntity,
	pub archive_type: Option<Arc<dyn ArchiveType>>,
}

pub struct FileTree {
	resources: Arc<ResourceStore>,
	pub(crate) state: RwLock<TreeState>,
}

impl FileTree {
	pub fn new(resources: Arc<ResourceStore>, channel: EventChannel) -> Self {
		Self {
			resources,
			state: RwLock::new(TreeState::new(channel)),
		}
	}

	/// Rebuild a tree from persisted nodes, given parents before children.
	///
	/// Nodes whose parent is unknown or whose name collides are skipped, as are
	/// views attached to anything but a restored file.
	pub fn restore(
		resources: Arc<ResourceStore>,
		channel: EventChannel,
		nodes: impl IntoIterator<Item = RestoredNode>,
		views: impl IntoIterator<Item = ViewEntity>,
	) -> Self {
		let mut state = TreeState::new(channel);
		let mut skipped = 0usize;

		for RestoredNode {
			entity,
			archive_type,
		} in nodes
		{
			if let Some(parent) = entity.parent {
				if !state.is_directory(parent) {
					warn!(file = %entity.id, %parent, "Skipping node with unknown parent");
					skipped += 1;
					continue;
				}
			}
			if state.ensure_name_free(entity.parent, &entity.name).is_err() {
				warn!(file = %entity.id, name = %entity.name, "Skipping node with duplicate name");
				skipped += 1;
				continue;
			}

			let content = match entity.kind {
				EntityKind::File { resource_id } => NodeContent::File { resource_id },
				EntityKind::Directory { .. } => NodeContent::Directory {
					children: BTreeMap::new(),
					archive_type,
				},
			};

			let node = Node {
				id: entity.id,
				name: entity.name,
				parent: entity.parent,
				file_type: entity.file_type,
				content,
			};
			if let Err(e) = state.insert(node) {
				warn!(?e, "Skipping node that failed to link");
				skipped += 1;
			}
		}

		for view in views {
			let attached_to_file = state
				.nodes
				.get(&view.file)
				.is_some_and(|node| !node.is_directory());
			if !attached_to_file || !state.views.insert(view.clone()) {
				warn!(file = %view.file, generator = %view.generator, "Skipping orphan view");
			}
		}

		info!(nodes = state.nodes.len(), skipped, "Restored file tree");

		Self {
			resources,
			state: RwLock::new(state),
		}
	}

	pub fn resources(&self) -> &Arc<ResourceStore> {
		&self.resources
	}

	/// Cache of generated views, kept coherent with file content
	pub fn views(&self) -> ViewCache<'_> {
		ViewCache::new(self)
	}

	/// Handle of the channel mutations are currently published on
	pub async fn channel(&self) -> EventChannel {
		self.state.read().await.channel.clone()
	}

	#[instrument(skip(self, content), fields(len = content.len()), err)]
	pub async fn create_file(
		&self,
		name: &str,
		parent: Option<FileId>,
		content: &[u8],
	) -> Result<FileEntity> {
		validate_name(name)?;

		let mut state = self.state.write().await;
		state.directory(parent)?;
		state.ensure_name_free(parent, name)?;
		Gate::new(&*state).check_add_file(parent)?;

		let resource_id = self.resources.allocate(content).await?;

		let node = Node {
			id: FileId::new(),
			name: name.to_string(),
			parent,
			file_type: None,
			content: NodeContent::File { resource_id },
		};
		let entity = node.to_entity();
		state.insert(node)?;
		state.channel.publish(Event::FileCreated {
			file: entity.clone(),
		});

		debug!(file = %entity.id, %resource_id, "Created file");
		Ok(entity)
	}

	#[instrument(skip(self), err)]
	pub async fn create_directory(&self, name: &str, parent: Option<FileId>) -> Result<FileEntity> {
		validate_name(name)?;

		let mut state = self.state.write().await;
		state.directory(parent)?;
		state.ensure_name_free(parent, name)?;
		Gate::new(&*state).check_add_directory(parent)?;

		let node = Node {
			id: FileId::new(),
			name: name.to_string(),
			parent,
			file_type: None,
			content: NodeContent::Directory {
				children: BTreeMap::new(),
				archive_type: None,
			},
		};
		let entity = node.to_entity();
		state.insert(node)?;
		state.channel.publish(Event::FileCreated {
			file: entity.clone(),
		});

		debug!(file = %entity.id, "Created directory");
		Ok(entity)
	}

	/// Replace a file's bytes, dropping every view generated from the old ones
	#[instrument(skip(self, bytes), fields(len = bytes.len()), err)]
	pub async fn update_content(&self, file: FileId, bytes: &[u8]) -> Result<FileEntity> {
		let mut state = self.state.write().await;
		let resource_id = state
			.node(file)?
			.resource_id()
			.ok_or(Error::IsDirectory(file))?;

		self.resources.overwrite(resource_id, bytes).await?;
		self.invalidate_views(&mut state, file).await;

		let entity = state.node(file)?.to_entity();
		state.channel.publish(Event::FileUpdated {
			file: entity.clone(),
		});

		Ok(entity)
	}

	#[instrument(skip(self), err)]
	pub async fn set_file_type(&self, file: FileId, file_type: Option<String>) -> Result<FileEntity> {
		let mut state = self.state.write().await;
		let node = state.node_mut(file)?;
		node.file_type = file_type;

		let entity = node.to_entity();
		state.channel.publish(Event::FileUpdated {
			file: entity.clone(),
		});

		Ok(entity)
	}

	#[instrument(skip(self), err)]
	pub async fn rename(&self, file: FileId, new_name: &str) -> Result<FileEntity> {
		validate_name(new_name)?;

		let mut state = self.state.write().await;
		let node = state.node(file)?;
		if node.name == new_name {
			return Ok(node.to_entity());
		}
		let (parent, old_name) = (node.parent, node.name.clone());

		state.ensure_name_free(parent, new_name)?;
		state.unlink(parent, &old_name)?;
		state.link(parent, new_name.to_string(), file)?;

		let node = state.node_mut(file)?;
		node.name = new_name.to_string();
		let entity = node.to_entity();

		state.channel.publish(Event::FileRenamed {
			file,
			old_name,
			new_name: new_name.to_string(),
		});

		Ok(entity)
	}

	/// Re-parent a node, `None` meaning the workspace root set
	#[instrument(skip(self), err)]
	pub async fn move_to(&self, file: FileId, new_parent: Option<FileId>) -> Result<FileEntity> {
		let mut state = self.state.write().await;
		let node = state.node(file)?;
		let (old_parent, name, is_directory) = (node.parent, node.name.clone(), node.is_directory());

		state.directory(new_parent)?;
		if old_parent == new_parent {
			return state.node(file).map(Node::to_entity);
		}
		if new_parent.is_some_and(|target| state.is_within(target, file)) {
			return Err(Error::MoveIntoOwnSubtree(file));
		}
		state.ensure_name_free(new_parent, &name)?;
		Gate::new(&*state).check_move(old_parent, new_parent, is_directory)?;

		state.unlink(old_parent, &name)?;
		state.link(new_parent, name, file)?;

		let node = state.node_mut(file)?;
		node.parent = new_parent;
		let entity = node.to_entity();

		state.channel.publish(Event::FileMoved {
			file,
			old_parent,
			new_parent,
		});

		Ok(entity)
	}

	/// Remove a file or an empty directory together with its resource and views
	#[instrument(skip(self), err)]
	pub async fn delete(&self, file: FileId) -> Result<()> {
		let mut state = self.state.write().await;
		let node = state.node(file)?;
		if node.children().is_some_and(|children| !children.is_empty()) {
			return Err(Error::DirectoryNotEmpty(file));
		}
		let (parent, name, resource_id) = (node.parent, node.name.clone(), node.resource_id());

		Gate::new(&*state).check_delete(parent)?;

		if let Some(resource_id) = resource_id {
			match self.resources.delete(resource_id).await {
				Ok(()) => {}
				Err(Error::ResourceNotFound(_)) => {
					warn!(%file, %resource_id, "Resource was already gone");
				}
				Err(e) => return Err(e),
			}
			state.by_resource.remove(&resource_id);
		}

		self.invalidate_views(&mut state, file).await;
		state.unlink(parent, &name)?;
		state.nodes.remove(&file);
		state.channel.publish(Event::FileDeleted { file });

		debug!(%file, "Deleted");
		Ok(())
	}

	/// Bind an archive policy to a directory without validating its contents
	#[instrument(skip(self, archive_type), fields(archive_type = archive_type.identifier()), err)]
	pub async fn mark_as_archive(
		&self,
		directory: FileId,
		archive_type: Arc<dyn ArchiveType>,
	) -> Result<FileEntity> {
		let mut state = self.state.write().await;
		bind_archive(&mut state, directory, archive_type)
	}

	/// Convert an existing directory into an archive, provided everything it
	/// already contains is allowed by the new policy
	#[instrument(skip(self, archive_type), fields(archive_type = archive_type.identifier()), err)]
	pub async fn create_from_scratch(
		&self,
		directory: FileId,
		archive_type: Arc<dyn ArchiveType>,
	) -> Result<FileEntity> {
		let mut state = self.state.write().await;
		state.directory(Some(directory))?;
		Gate::new(&*state).check_create_from_scratch(directory, &archive_type)?;

		bind_archive(&mut state, directory, archive_type)
	}

	pub async fn get(&self, file: FileId) -> Result<FileEntity> {
		self.state.read().await.node(file).map(Node::to_entity)
	}

	/// Children of a directory, ordered by name
	pub async fn children(&self, directory: FileId) -> Result<Vec<FileEntity>> {
		let state = self.state.read().await;
		let children = state.container(Some(directory))?;

		Ok(children
			.values()
			.filter_map(|id| state.nodes.get(id))
			.map(Node::to_entity)
			.collect())
	}

	/// Root nodes, ordered by name
	pub async fn list_roots(&self) -> Vec<FileEntity> {
		let state = self.state.read().await;
		state
			.roots
			.values()
			.filter_map(|id| state.nodes.get(id))
			.map(Node::to_entity)
			.collect()
	}

	/// Resolve a `/`-separated path, starting at the root set
	pub async fn resolve_path(&self, path: &str) -> Result<FileEntity> {
		let state = self.state.read().await;
		let not_found = |segment: &str| Error::PathNotFound {
			path: path.to_string(),
			segment: segment.to_string(),
		};

		let mut current: Option<FileId> = None;
		for segment in path_segments(path) {
			let container = match current {
				None => &state.roots,
				Some(id) => state.node(id)?.children().ok_or_else(|| not_found(segment))?,
			};
			current = Some(
				container
					.get(segment)
					.copied()
					.ok_or_else(|| not_found(segment))?,
			);
		}

		let id = current.ok_or_else(|| not_found(""))?;
		state.node(id).map(Node::to_entity)
	}

	pub async fn lookup_by_resource_id(&self, resource_id: ResourceId) -> Result<FileEntity> {
		let state = self.state.read().await;
		let id = state
			.by_resource
			.get(&resource_id)
			.copied()
			.ok_or(Error::ResourceNotFound(resource_id))?;

		state.node(id).map(Node::to_entity)
	}

	/// Every node, parents before children
	pub async fn snapshot(&self) -> Vec<FileEntity> {
		self.state.read().await.snapshot()
	}

	pub async fn nearest_archive(&self, file: FileId) -> Result<Option<NearestArchive>> {
		let state = self.state.read().await;
		state.node(file)?;
		Ok(Gate::new(&*state).nearest_archive(file))
	}

	pub async fn can_add_file(&self, directory: Option<FileId>) -> bool {
		Gate::new(&*self.state.read().await).can_add_file(directory)
	}

	pub async fn can_add_directory(&self, directory: Option<FileId>) -> bool {
		Gate::new(&*self.state.read().await).can_add_directory(directory)
	}

	pub async fn can_move_file(&self, directory: Option<FileId>) -> bool {
		Gate::new(&*self.state.read().await).can_move_file(directory)
	}

	pub async fn can_delete_file(&self, directory: Option<FileId>) -> bool {
		Gate::new(&*self.state.read().await).can_delete_file(directory)
	}

	/// Block every mutation until the returned guard is dropped
	pub async fn quiesce(&self) -> QuiescedTree<'_> {
		QuiescedTree {
			state: self.state.write().await,
		}
	}

	/// Drop every cached view of `file`, publishing one `ViewDeleted` each
	pub(crate) async fn invalidate_views(&self, state: &mut TreeState, file: FileId) -> usize {
		let views = state.views.take_all(file);
		let count = views.len();

		for view in views {
			report_error(
				&self.resources.delete(view.resource_id).await,
				"deleting view resource",
			);
			state.channel.publish(Event::ViewDeleted {
				file,
				generator: view.generator,
			});
		}

		if count > 0 {
			debug!(%file, count, "Invalidated views");
		}
		count
	}
}

fn bind_archive(
	state: &mut TreeState,
	directory: FileId,
	archive_type: Arc<dyn ArchiveType>,
) -> Result<FileEntity> {
	let identifier = archive_type.identifier().to_string();

	let node = state.node_mut(directory)?;
	match &mut node.content {
		NodeContent::Directory {
			archive_type: slot, ..
		} => *slot = Some(archive_type),
		NodeContent::File { .. } => return Err(Error::NotADirectory(directory)),
	}
	let entity = node.to_entity();

	state.channel.publish(Event::ArchiveCreated {
		directory,
		archive_type: identifier,
	});

	info!(%directory, archive_type = ?entity.archive_type(), "Marked directory as archive");
	Ok(entity)
}

/// Exclusive hold on the tree, used to swap its event channel safely
pub struct QuiescedTree<'a> {
	state: RwLockWriteGuard<'a, TreeState>,
}

impl QuiescedTree<'_> {
	pub fn snapshot(&self) -> Vec<FileEntity> {
		self.state.snapshot()
	}

	pub fn views(&self) -> Vec<ViewEntity> {
		self.state.views.all().cloned().collect()
	}

	pub fn channel(&self) -> &EventChannel {
		&self.state.channel
	}

	/// Publish on `channel` from now on, returning the previous one
	pub fn replace_channel(&mut self, channel: EventChannel) -> EventChannel {
		std::mem::replace(&mut self.state.channel, channel)
	}
}

#[cfg(test)]
mod tests;
