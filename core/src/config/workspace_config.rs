//! Workspace configuration

use super::Migrate;
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::{
	fs,
	path::{Path, PathBuf},
	time::Duration,
};
use tracing::{info, warn};

const CONFIG_FILE_NAME: &str = "workspace.json";

/// Configuration stored at the root of every workspace directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceConfig {
	/// Config schema version
	pub version: u32,

	/// Workspace directory path, not persisted
	#[serde(skip)]
	pub workspace_dir: PathBuf,

	/// Logging level used when `RUST_LOG` is not set
	pub log_level: String,

	/// Mirror database settings
	#[serde(default)]
	pub database: DatabaseConfig,
}

/// Settings for the relational mirror
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
	/// File name of the SQLite database inside the workspace directory
	pub file_name: String,
	pub max_connections: u32,
	pub min_connections: u32,
	pub connect_timeout_secs: u64,
	/// Forward sqlx statement logging to tracing
	pub sqlx_logging: bool,
}

impl Default for DatabaseConfig {
	fn default() -> Self {
		Self {
			file_name: "mirror.db".to_string(),
			max_connections: 10,
			min_connections: 1,
			connect_timeout_secs: 8,
			sqlx_logging: false,
		}
	}
}

impl DatabaseConfig {
	pub fn connect_timeout(&self) -> Duration {
		Duration::from_secs(self.connect_timeout_secs)
	}
}

impl WorkspaceConfig {
	/// Load configuration from a workspace directory, creating the default
	/// document when none exists yet
	pub fn load_or_create(workspace_dir: &Path) -> Result<Self> {
		let config_path = workspace_dir.join(CONFIG_FILE_NAME);

		if !config_path.exists() {
			warn!("No config found, creating default at {:?}", config_path);
			let config = Self::default_with_dir(workspace_dir.to_path_buf());
			config.save()?;
			return Ok(config);
		}

		info!("Loading config from {:?}", config_path);
		let json = fs::read_to_string(&config_path)
			.with_context(|| format!("failed to read {}", config_path.display()))?;
		let mut config: WorkspaceConfig = serde_json::from_str(&json)
			.with_context(|| format!("failed to parse {}", config_path.display()))?;
		config.workspace_dir = workspace_dir.to_path_buf();

		if config.version > Self::target_version() {
			return Err(anyhow!(
				"{} has config version {}, newer than the supported v{}",
				config_path.display(),
				config.version,
				Self::target_version()
			));
		}

		if config.needs_migration() {
			info!(
				"Migrating config from v{} to v{}",
				config.version,
				Self::target_version()
			);
			config.migrate()?;
			config.save()?;
		}

		Ok(config)
	}

	/// Create default configuration for a specific workspace directory
	pub fn default_with_dir(workspace_dir: PathBuf) -> Self {
		Self {
			version: Self::target_version(),
			workspace_dir,
			log_level: "info".to_string(),
			database: DatabaseConfig::default(),
		}
	}

	/// Save configuration to disk
	pub fn save(&self) -> Result<()> {
		fs::create_dir_all(&self.workspace_dir).with_context(|| {
			format!(
				"failed to create workspace directory {}",
				self.workspace_dir.display()
			)
		})?;

		let config_path = self.workspace_dir.join(CONFIG_FILE_NAME);
		let json = serde_json::to_string_pretty(self)?;
		fs::write(&config_path, json)
			.with_context(|| format!("failed to write {}", config_path.display()))?;
		info!("Saved config to {:?}", config_path);
		Ok(())
	}

	pub fn resources_dir(&self) -> PathBuf {
		self.workspace_dir.join("resources")
	}

	pub fn index_path(&self) -> PathBuf {
		self.workspace_dir.join("index")
	}

	pub fn database_path(&self) -> PathBuf {
		self.workspace_dir.join(&self.database.file_name)
	}

	pub fn logs_dir(&self) -> PathBuf {
		self.workspace_dir.join("logs")
	}
}

impl Migrate for WorkspaceConfig {
	fn current_version(&self) -> u32 {
		self.version
	}

	fn target_version() -> u32 {
		1
	}

	fn migrate(&mut self) -> Result<()> {
		match self.version {
			0 => {
				// v0 documents predate the database section, serde defaults fill it in
				self.version = 1;
				Ok(())
			}
			1 => Ok(()),
			v => Err(anyhow!("Unknown config version: {}", v)),
		}
	}
}
