use std::sync::Arc;

use tracing::debug;

use super::{ArchiveType, NearestArchive};
use crate::{
	error::{Error, Result},
	tree::FileId,
};

/// Read access the gate needs into a tree structure
pub trait ArchiveTree {
	fn parent_of(&self, id: FileId) -> Option<FileId>;

	/// Archive type bound to `id`, if it is an archive directory
	fn archive_of(&self, id: FileId) -> Option<&Arc<dyn ArchiveType>>;

	fn is_directory(&self, id: FileId) -> bool;

	fn children_of(&self, id: FileId) -> Vec<FileId>;
}

/// Authorizes structural mutations against the nearest enclosing archive
pub struct Gate<'a, T: ArchiveTree + ?Sized> {
	tree: &'a T,
}

impl<'a, T: ArchiveTree + ?Sized> Gate<'a, T> {
	pub fn new(tree: &'a T) -> Self {
		Self { tree }
	}

	/// Walk from `node` through its ancestors to the first archive directory
	pub fn nearest_archive(&self, node: FileId) -> Option<NearestArchive> {
		let mut current = Some(node);
		while let Some(id) = current {
			if let Some(archive_type) = self.tree.archive_of(id) {
				return Some(NearestArchive {
					root: id,
					archive_type: Arc::clone(archive_type),
				});
			}
			current = self.tree.parent_of(id);
		}

		None
	}

	fn nearest_for(&self, directory: Option<FileId>) -> Option<NearestArchive> {
		directory.and_then(|id| self.nearest_archive(id))
	}

	pub fn can_add_file(&self, directory: Option<FileId>) -> bool {
		self.nearest_for(directory)
			.map_or(true, |archive| archive.archive_type.can_add_file())
	}

	pub fn can_add_directory(&self, directory: Option<FileId>) -> bool {
		self.nearest_for(directory)
			.map_or(true, |archive| archive.archive_type.can_add_directory())
	}

	pub fn can_move_file(&self, directory: Option<FileId>) -> bool {
		self.nearest_for(directory)
			.map_or(true, |archive| archive.archive_type.can_move_file())
	}

	pub fn can_delete_file(&self, directory: Option<FileId>) -> bool {
		self.nearest_for(directory)
			.map_or(true, |archive| archive.archive_type.can_delete_file())
	}

	pub fn check_add_file(&self, directory: Option<FileId>) -> Result<()> {
		self.check(directory, "adding files", |t| t.can_add_file())
	}

	pub fn check_add_directory(&self, directory: Option<FileId>) -> Result<()> {
		self.check(directory, "adding directories", |t| t.can_add_directory())
	}

	pub fn check_delete(&self, directory: Option<FileId>) -> Result<()> {
		self.check(directory, "deleting files", |t| t.can_delete_file())
	}

	/// Authorize moving a node from `source` to `destination`.
	///
	/// Inside one archive only move support is needed. Crossing an archive
	/// boundary (including to or from the bare workspace root) is a delete on
	/// the source side plus an add on the destination side.
	pub fn check_move(
		&self,
		source: Option<FileId>,
		destination: Option<FileId>,
		is_directory: bool,
	) -> Result<()> {
		let from = self.nearest_for(source);
		let to = self.nearest_for(destination);

		match (&from, &to) {
			(Some(from), Some(to)) if from.root == to.root => {
				if from.archive_type.can_move_file() {
					Ok(())
				} else {
					Err(violation(&from.archive_type, "moving files"))
				}
			}
			_ => {
				if let Some(from) = &from {
					if !from.archive_type.can_delete_file() {
						return Err(violation(&from.archive_type, "moving files out"));
					}
				}
				if let Some(to) = &to {
					if !to.archive_type.can_add_file() {
						return Err(violation(&to.archive_type, "moving files in"));
					}
					if is_directory && !to.archive_type.can_add_directory() {
						return Err(violation(&to.archive_type, "moving directories in"));
					}
				}
				Ok(())
			}
		}
	}

	/// Validate that `directory` and everything below it would have been
	/// allowed under `archive_type`
	pub fn check_create_from_scratch(
		&self,
		directory: FileId,
		archive_type: &Arc<dyn ArchiveType>,
	) -> Result<()> {
		if !archive_type.can_create_from_scratch() {
			return Err(violation(archive_type, "creation from scratch"));
		}

		let mut pending = self.tree.children_of(directory);
		while let Some(id) = pending.pop() {
			if self.tree.is_directory(id) {
				if !archive_type.can_add_directory() {
					debug!(%id, "Descendant directory blocks archive conversion");
					return Err(violation(archive_type, "adding directories"));
				}
				pending.extend(self.tree.children_of(id));
			} else if !archive_type.can_add_file() {
				debug!(%id, "Descendant file blocks archive conversion");
				return Err(violation(archive_type, "adding files"));
			}
		}

		Ok(())
	}

	fn check(
		&self,
		directory: Option<FileId>,
		operation: &'static str,
		allowed: impl FnOnce(&dyn ArchiveType) -> bool,
	) -> Result<()> {
		match self.nearest_for(directory) {
			Some(archive) if !allowed(archive.archive_type.as_ref()) => {
				Err(violation(&archive.archive_type, operation))
			}
			_ => Ok(()),
		}
	}
}

fn violation(archive_type: &Arc<dyn ArchiveType>, operation: &'static str) -> Error {
	Error::PolicyViolation {
		archive_type: archive_type.identifier().to_string(),
		operation,
	}
}
