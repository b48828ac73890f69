//! Workspace error taxonomy

use binspect_utils::error::FileIOError;
use thiserror::Error;

use crate::{
	infra::db::SyncError, resource::ResourceId, tree::FileId, view::GeneratorType,
};

/// Broad class of a workspace failure, used by outer layers to pick a status
/// or exit code without matching on every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::AsRefStr, strum::Display)]
pub enum ErrorKind {
	NotFound,
	PolicyViolation,
	InvariantViolation,
	StorageFailure,
}

impl ErrorKind {
	/// Process exit code for CLI front-ends
	pub const fn exit_code(self) -> i32 {
		match self {
			Self::NotFound => 2,
			Self::PolicyViolation => 3,
			Self::InvariantViolation => 4,
			Self::StorageFailure => 5,
		}
	}
}

/// Workspace operation errors
#[derive(Error, Debug)]
pub enum Error {
	// Not found
	#[error("file not found: {0}")]
	FileNotFound(FileId),
	#[error("resource not found: {0}")]
	ResourceNotFound(ResourceId),
	#[error("path '{path}' does not resolve: no directory entry '{segment}'")]
	PathNotFound { path: String, segment: String },
	#[error("file {file} has no '{generator}' view")]
	ViewNotFound { file: FileId, generator: GeneratorType },
	#[error("unknown archive type: {0}")]
	ArchiveTypeNotFound(String),

	// Policy violations
	#[error("archive type '{archive_type}' does not allow {operation}")]
	PolicyViolation {
		archive_type: String,
		operation: &'static str,
	},
	#[error("diagnostic queries must be read-only")]
	ReadOnlyQuery,

	// Invariant violations
	#[error("{0} is a directory")]
	IsDirectory(FileId),
	#[error("{0} is not a directory")]
	NotADirectory(FileId),
	#[error("directory {0} is not empty")]
	DirectoryNotEmpty(FileId),
	#[error("file {file} already has a '{generator}' view")]
	ViewAlreadyExists { file: FileId, generator: GeneratorType },
	#[error("invalid file name: {0:?}")]
	InvalidName(String),
	#[error("an entry named '{0}' already exists there")]
	NameTaken(String),
	#[error("cannot move {0} into its own subtree")]
	MoveIntoOwnSubtree(FileId),

	// Storage failures
	#[error(transparent)]
	FileIO(#[from] FileIOError),
	#[error("database error: {0}")]
	Database(#[from] sea_orm::DbErr),
	#[error("mirror error: {0}")]
	Sync(#[from] SyncError),
	#[error("resource index is corrupted: {0}")]
	CorruptedIndex(String),
	#[error(transparent)]
	Config(#[from] anyhow::Error),
}

impl Error {
	pub fn kind(&self) -> ErrorKind {
		match self {
			Self::FileNotFound(_)
			| Self::ResourceNotFound(_)
			| Self::PathNotFound { .. }
			| Self::ViewNotFound { .. }
			| Self::ArchiveTypeNotFound(_) => ErrorKind::NotFound,

			Self::PolicyViolation { .. } | Self::ReadOnlyQuery => ErrorKind::PolicyViolation,

			Self::IsDirectory(_)
			| Self::NotADirectory(_)
			| Self::DirectoryNotEmpty(_)
			| Self::ViewAlreadyExists { .. }
			| Self::InvalidName(_)
			| Self::NameTaken(_)
			| Self::MoveIntoOwnSubtree(_) => ErrorKind::InvariantViolation,

			Self::FileIO(_)
			| Self::Database(_)
			| Self::Sync(_)
			| Self::CorruptedIndex(_)
			| Self::Config(_) => ErrorKind::StorageFailure,
		}
	}
}

/// Result type for workspace operations
pub type Result<T> = std::result::Result<T, Error>;
