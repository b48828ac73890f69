use std::{
	collections::{BTreeMap, HashMap, VecDeque},
	sync::Arc,
};

use super::{EntityKind, FileEntity, FileId};
use crate::{
	archive::{ArchiveTree, ArchiveType},
	error::{Error, Result},
	infra::event::EventChannel,
	resource::ResourceId,
	view::ViewIndex,
};

pub(crate) struct Node {
	pub(crate) id: FileId,
	pub(crate) name: String,
	pub(crate) parent: Option<FileId>,
	pub(crate) file_type: Option<String>,
	pub(crate) content: NodeContent,
}

pub(crate) enum NodeContent {
	File {
		resource_id: ResourceId,
	},
	Directory {
		children: BTreeMap<String, FileId>,
		archive_type: Option<Arc<dyn ArchiveType>>,
	},
}

impl Node {
	pub(crate) fn is_directory(&self) -> bool {
		matches!(self.content, NodeContent::Directory { .. })
	}

	pub(crate) fn resource_id(&self) -> Option<ResourceId> {
		match self.content {
			NodeContent::File { resource_id } => Some(resource_id),
			NodeContent::Directory { .. } => None,
		}
	}

	pub(crate) fn children(&self) -> Option<&BTreeMap<String, FileId>> {
		match &self.content {
			NodeContent::Directory { children, .. } => Some(children),
			NodeContent::File { .. } => None,
		}
	}

	pub(crate) fn to_entity(&self) -> FileEntity {
		FileEntity {
			id: self.id,
			name: self.name.clone(),
			parent: self.parent,
			file_type: self.file_type.clone(),
			kind: match &self.content {
				NodeContent::File { resource_id } => EntityKind::File {
					resource_id: *resource_id,
				},
				NodeContent::Directory { archive_type, .. } => EntityKind::Directory {
					archive_type: archive_type
						.as_ref()
						.map(|archive_type| archive_type.identifier().to_string()),
				},
			},
		}
	}
}

/// Everything guarded by the tree's writer lock
pub(crate) struct TreeState {
	pub(crate) nodes: HashMap<FileId, Node>,
	pub(crate) roots: BTreeMap<String, FileId>,
	pub(crate) by_resource: HashMap<ResourceId, FileId>,
	pub(crate) views: ViewIndex,
	pub(crate) channel: EventChannel,
}

impl TreeState {
	pub(crate) fn new(channel: EventChannel) -> Self {
		Self {
			nodes: HashMap::new(),
			roots: BTreeMap::new(),
			by_resource: HashMap::new(),
			views: ViewIndex::default(),
			channel,
		}
	}

	pub(crate) fn node(&self, id: FileId) -> Result<&Node> {
		self.nodes.get(&id).ok_or(Error::FileNotFound(id))
	}

	pub(crate) fn node_mut(&mut self, id: FileId) -> Result<&mut Node> {
		self.nodes.get_mut(&id).ok_or(Error::FileNotFound(id))
	}

	/// Resolve an optional parent, checking it exists and is a directory
	pub(crate) fn directory(&self, id: Option<FileId>) -> Result<Option<&Node>> {
		let Some(id) = id else {
			return Ok(None);
		};

		let node = self.node(id)?;
		if node.is_directory() {
			Ok(Some(node))
		} else {
			Err(Error::NotADirectory(id))
		}
	}

	/// Name -> id map of the container `parent` (the root set for `None`)
	pub(crate) fn container(&self, parent: Option<FileId>) -> Result<&BTreeMap<String, FileId>> {
		match parent {
			None => Ok(&self.roots),
			Some(id) => self.node(id)?.children().ok_or(Error::NotADirectory(id)),
		}
	}

	fn container_mut(&mut self, parent: Option<FileId>) -> Result<&mut BTreeMap<String, FileId>> {
		match parent {
			None => Ok(&mut self.roots),
			Some(id) => match &mut self.node_mut(id)?.content {
				NodeContent::Directory { children, .. } => Ok(children),
				NodeContent::File { .. } => Err(Error::NotADirectory(id)),
			},
		}
	}

	pub(crate) fn ensure_name_free(&self, parent: Option<FileId>, name: &str) -> Result<()> {
		if self.container(parent)?.contains_key(name) {
			Err(Error::NameTaken(name.to_string()))
		} else {
			Ok(())
		}
	}

	/// Insert a detached node and link it under its parent
	pub(crate) fn insert(&mut self, node: Node) -> Result<()> {
		let (id, parent, name) = (node.id, node.parent, node.name.clone());
		self.container_mut(parent)?.insert(name, id);
		if let Some(resource_id) = node.resource_id() {
			self.by_resource.insert(resource_id, id);
		}
		self.nodes.insert(id, node);
		Ok(())
	}

	/// Remove `name` from the container `parent`
	pub(crate) fn unlink(&mut self, parent: Option<FileId>, name: &str) -> Result<()> {
		self.container_mut(parent)?.remove(name);
		Ok(())
	}

	pub(crate) fn link(&mut self, parent: Option<FileId>, name: String, id: FileId) -> Result<()> {
		self.container_mut(parent)?.insert(name, id);
		Ok(())
	}

	/// Whether `candidate` is `ancestor` itself or lies below it
	pub(crate) fn is_within(&self, candidate: FileId, ancestor: FileId) -> bool {
		let mut current = Some(candidate);
		while let Some(id) = current {
			if id == ancestor {
				return true;
			}
			current = self.nodes.get(&id).and_then(|node| node.parent);
		}
		false
	}

	/// Every node, parents strictly before their children
	pub(crate) fn snapshot(&self) -> Vec<FileEntity> {
		let mut ordered = Vec::with_capacity(self.nodes.len());
		let mut queue = self.roots.values().copied().collect::<VecDeque<_>>();

		while let Some(id) = queue.pop_front() {
			let Some(node) = self.nodes.get(&id) else {
				continue;
			};
			ordered.push(node.to_entity());
			if let Some(children) = node.children() {
				queue.extend(children.values().copied());
			}
		}

		ordered
	}
}

impl ArchiveTree for TreeState {
	fn parent_of(&self, id: FileId) -> Option<FileId> {
		self.nodes.get(&id).and_then(|node| node.parent)
	}

	fn archive_of(&self, id: FileId) -> Option<&Arc<dyn ArchiveType>> {
		match &self.nodes.get(&id)?.content {
			NodeContent::Directory { archive_type, .. } => archive_type.as_ref(),
			NodeContent::File { .. } => None,
		}
	}

	fn is_directory(&self, id: FileId) -> bool {
		self.nodes.get(&id).is_some_and(Node::is_directory)
	}

	fn children_of(&self, id: FileId) -> Vec<FileId> {
		self.nodes
			.get(&id)
			.and_then(Node::children)
			.map(|children| children.values().copied().collect())
			.unwrap_or_default()
	}
}

pub(crate) fn validate_name(name: &str) -> Result<()> {
	if name.is_empty() || name.contains('/') || name.contains('\0') {
		Err(Error::InvalidName(name.to_string()))
	} else {
		Ok(())
	}
}
