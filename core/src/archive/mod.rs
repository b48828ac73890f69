//! Archive capability gate
//!
//! Directories can be bound to an [`ArchiveType`], a plugin supplied policy
//! deciding which structural mutations are allowed below it. The gate resolves
//! the nearest enclosing archive of a node and delegates to its policy;
//! anything outside every archive (bare workspace root) is always allowed.

use std::{
	collections::HashMap,
	fmt,
	sync::{Arc, RwLock},
};

use tracing::{debug, info};

use crate::{
	error::{Error, Result},
	tree::FileId,
};

mod gate;

pub use gate::{ArchiveTree, Gate};

/// Capability descriptor for a family of archives (jar, zip, apk, ...)
pub trait ArchiveType: Send + Sync + 'static {
	/// Stable identifier, also used as the registry key and mirrored row key
	fn identifier(&self) -> &str;

	fn can_add_file(&self) -> bool;

	fn can_move_file(&self) -> bool;

	fn can_delete_file(&self) -> bool;

	fn can_add_directory(&self) -> bool;

	/// Whether an existing plain directory may be converted into this archive type
	fn can_create_from_scratch(&self) -> bool;
}

impl fmt::Debug for dyn ArchiveType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ArchiveType")
			.field("identifier", &self.identifier())
			.finish_non_exhaustive()
	}
}

/// Plain capability set, for plugins that do not need dynamic decisions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveCapabilities {
	pub identifier: String,
	pub add_file: bool,
	pub move_file: bool,
	pub delete_file: bool,
	pub add_directory: bool,
	pub create_from_scratch: bool,
}

impl ArchiveCapabilities {
	/// Every capability granted
	pub fn permissive(identifier: impl Into<String>) -> Self {
		Self {
			identifier: identifier.into(),
			add_file: true,
			move_file: true,
			delete_file: true,
			add_directory: true,
			create_from_scratch: true,
		}
	}

	/// No structural mutation allowed at all
	pub fn read_only(identifier: impl Into<String>) -> Self {
		Self {
			identifier: identifier.into(),
			add_file: false,
			move_file: false,
			delete_file: false,
			add_directory: false,
			create_from_scratch: false,
		}
	}
}

impl ArchiveType for ArchiveCapabilities {
	fn identifier(&self) -> &str {
		&self.identifier
	}

	fn can_add_file(&self) -> bool {
		self.add_file
	}

	fn can_move_file(&self) -> bool {
		self.move_file
	}

	fn can_delete_file(&self) -> bool {
		self.delete_file
	}

	fn can_add_directory(&self) -> bool {
		self.add_directory
	}

	fn can_create_from_scratch(&self) -> bool {
		self.create_from_scratch
	}
}

/// The archive enclosing a node: the directory it is bound to and its policy
#[derive(Debug, Clone)]
pub struct NearestArchive {
	pub root: FileId,
	pub archive_type: Arc<dyn ArchiveType>,
}

/// Identifier -> implementation map, filled in as plugins load
#[derive(Default)]
pub struct ArchiveTypeRegistry {
	types: RwLock<HashMap<String, Arc<dyn ArchiveType>>>,
}

impl ArchiveTypeRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Register an archive type, replacing any previous one with the same identifier
	pub fn register(&self, archive_type: Arc<dyn ArchiveType>) {
		let identifier = archive_type.identifier().to_string();
		info!(%identifier, "Registered archive type");
		self.types
			.write()
			.unwrap_or_else(|poisoned| poisoned.into_inner())
			.insert(identifier, archive_type);
	}

	pub fn unregister(&self, identifier: &str) -> Option<Arc<dyn ArchiveType>> {
		let removed = self
			.types
			.write()
			.unwrap_or_else(|poisoned| poisoned.into_inner())
			.remove(identifier);
		if removed.is_some() {
			debug!(%identifier, "Unregistered archive type");
		}
		removed
	}

	pub fn get(&self, identifier: &str) -> Option<Arc<dyn ArchiveType>> {
		self.types
			.read()
			.unwrap_or_else(|poisoned| poisoned.into_inner())
			.get(identifier)
			.cloned()
	}

	pub fn resolve(&self, identifier: &str) -> Result<Arc<dyn ArchiveType>> {
		self.get(identifier)
			.ok_or_else(|| Error::ArchiveTypeNotFound(identifier.to_string()))
	}

	pub fn identifiers(&self) -> Vec<String> {
		let mut identifiers = self
			.types
			.read()
			.unwrap_or_else(|poisoned| poisoned.into_inner())
			.keys()
			.cloned()
			.collect::<Vec<_>>();
		identifiers.sort();
		identifiers
	}
}
