//! Relational mirror of the file tree, using SeaORM over SQLite

use std::path::{Path, PathBuf};

use sea_orm::{ConnectOptions, ConnectionTrait, Database as SeaDatabase, DatabaseConnection, DbErr};
use sea_orm_migration::MigratorTrait;
use tracing::info;

use crate::config::DatabaseConfig;

pub mod entities;
pub mod migration;
pub mod sync;

pub use sync::{MirroredTree, SyncError, SyncObserver};

/// Database wrapper for a workspace mirror
///
/// Diagnostics get their own pool opened with `mode=ro`, so nothing they do
/// can leave a connection in the write pool unable to write.
pub struct Database {
	conn: DatabaseConnection,
	reader: DatabaseConnection,
	path: PathBuf,
}

impl Database {
	/// Open the database at `path`, creating it if missing
	pub async fn open(path: &Path, config: &DatabaseConfig) -> Result<Self, DbErr> {
		if let Some(parent) = path.parent() {
			tokio::fs::create_dir_all(parent)
				.await
				.map_err(|e| DbErr::Custom(format!("Failed to create directory: {e}")))?;
		}

		// The write pool creates the file, so it has to connect first
		let conn = connect(path, "rwc", config).await?;
		// WAL keeps long diagnostic reads from blocking mirror writes
		conn.execute_unprepared("PRAGMA journal_mode = WAL").await?;
		let reader = connect(path, "ro", config).await?;

		info!(path = %path.display(), "Opened mirror database");

		Ok(Self {
			conn,
			reader,
			path: path.to_path_buf(),
		})
	}

	pub async fn migrate(&self) -> Result<(), DbErr> {
		migration::Migrator::up(&self.conn, None).await?;
		info!("Database migrations completed successfully");
		Ok(())
	}

	pub fn conn(&self) -> &DatabaseConnection {
		&self.conn
	}

	/// Read-only pool for diagnostic queries
	pub fn reader(&self) -> &DatabaseConnection {
		&self.reader
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	pub async fn close(self) -> Result<(), DbErr> {
		self.reader.close().await?;
		self.conn.close().await?;
		info!(path = %self.path.display(), "Closed mirror database");
		Ok(())
	}
}

async fn connect(path: &Path, mode: &str, config: &DatabaseConfig) -> Result<DatabaseConnection, DbErr> {
	let mut opt = ConnectOptions::new(format!("sqlite://{}?mode={mode}", path.display()));
	opt.max_connections(config.max_connections)
		.min_connections(config.min_connections)
		.connect_timeout(config.connect_timeout())
		.sqlx_logging(config.sqlx_logging);

	SeaDatabase::connect(opt).await
}
