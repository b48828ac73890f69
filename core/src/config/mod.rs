//! Workspace configuration management

use anyhow::Result;

pub mod workspace_config;

pub use workspace_config::{DatabaseConfig, WorkspaceConfig};

/// Versioned configuration documents that know how to upgrade themselves
pub trait Migrate {
	fn current_version(&self) -> u32;

	fn target_version() -> u32;

	fn migrate(&mut self) -> Result<()>;

	fn needs_migration(&self) -> bool {
		self.current_version() < Self::target_version()
	}
}
