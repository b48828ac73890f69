//! Workspace: one directory on disk, wired into a live tree
//!
//! Opening a workspace builds every service from scratch (resource store,
//! mirror database, event channel, tree) and restores the tree from the mirror.
//! Nothing is global, so several workspaces can be open side by side.

use std::{collections::HashMap, path::Path, sync::Arc};

use binspect_utils::error::report_error;
use sea_orm::JsonValue;
use tokio::sync::RwLock;
use tracing::{info, instrument};

use crate::{
	archive::ArchiveTypeRegistry,
	config::WorkspaceConfig,
	error::Result,
	infra::{
		db::{Database, MirroredTree, SyncObserver},
		event::{EventChannel, EventObserver, ObserverId},
	},
	resource::ResourceStore,
	tree::{FileEntity, FileId, FileTree},
};

struct Mirror {
	database: Database,
	observer: Arc<SyncObserver>,
	observer_id: ObserverId,
}

pub struct Workspace {
	config: WorkspaceConfig,
	registry: Arc<ArchiveTypeRegistry>,
	tree: FileTree,
	mirror: RwLock<Mirror>,
}

impl Workspace {
	/// Open the workspace at `path`, creating it if the directory is empty
	#[instrument(skip_all, fields(path = %path.as_ref().display()), err)]
	pub async fn open(path: impl AsRef<Path>, registry: Arc<ArchiveTypeRegistry>) -> Result<Self> {
		let config = WorkspaceConfig::load_or_create(path.as_ref())?;

		let resources =
			Arc::new(ResourceStore::open(config.resources_dir(), config.index_path()).await?);

		let database = Database::open(&config.database_path(), &config.database).await?;
		database.migrate().await?;

		let observer = Arc::new(SyncObserver::new(&database));
		let MirroredTree { nodes, views } = observer.load(&registry).await?;

		let channel = EventChannel::spawn();
		let observer_id = channel.subscribe(Arc::clone(&observer) as _);
		let tree = FileTree::restore(resources, channel, nodes, views);

		info!("Workspace opened");

		Ok(Self {
			config,
			registry,
			tree,
			mirror: RwLock::new(Mirror {
				database,
				observer,
				observer_id,
			}),
		})
	}

	/// Deliver pending events, stop the channel and close the database
	pub async fn close(self) -> Result<()> {
		self.tree.channel().await.shutdown().await;
		self.mirror.into_inner().database.close().await?;

		info!(path = %self.config.workspace_dir.display(), "Workspace closed");
		Ok(())
	}

	pub fn tree(&self) -> &FileTree {
		&self.tree
	}

	pub fn resources(&self) -> &Arc<ResourceStore> {
		self.tree.resources()
	}

	pub fn registry(&self) -> &Arc<ArchiveTypeRegistry> {
		&self.registry
	}

	pub fn config(&self) -> &WorkspaceConfig {
		&self.config
	}

	/// Observe every mutation committed from now on. Subscriptions survive
	/// [`Workspace::reload_database`].
	pub async fn subscribe(&self, observer: Arc<dyn EventObserver>) -> ObserverId {
		self.tree.channel().await.subscribe(observer)
	}

	pub async fn unsubscribe(&self, id: ObserverId) -> bool {
		self.tree.channel().await.unsubscribe(id).await
	}

	/// Wait until every observer has seen every mutation committed so far
	pub async fn flush(&self) {
		self.tree.channel().await.flush().await;
	}

	/// Database id of `file`'s mirrored row, once the mirror has caught up
	pub async fn database_id(&self, file: FileId) -> Option<i32> {
		self.mirror.read().await.observer.database_id(file)
	}

	/// Read-only diagnostic SQL against the mirror
	pub async fn query(&self, sql: &str) -> Result<Vec<JsonValue>> {
		self.mirror.read().await.observer.query_raw(sql).await
	}

	/// Mark a directory as an archive of a registered type
	pub async fn mark_as_archive_by_id(
		&self,
		directory: FileId,
		identifier: &str,
	) -> Result<FileEntity> {
		let archive_type = self.registry.resolve(identifier)?;
		self.tree.mark_as_archive(directory, archive_type).await
	}

	/// Convert a directory into an archive of a registered type, validating
	/// its current contents
	pub async fn create_from_scratch_by_id(
		&self,
		directory: FileId,
		identifier: &str,
	) -> Result<FileEntity> {
		let archive_type = self.registry.resolve(identifier)?;
		self.tree.create_from_scratch(directory, archive_type).await
	}

	/// Reopen the mirror database and rebind the sync observer to it.
	///
	/// Mutations are held off for the duration. Observers must not call back
	/// into the tree while handling events, or this deadlocks on the flush.
	#[instrument(skip(self), err)]
	pub async fn reload_database(&self) -> Result<()> {
		let mut mirror = self.mirror.write().await;
		let mut quiesced = self.tree.quiesce().await;

		let old_channel = quiesced.channel().clone();
		old_channel.flush().await;

		let database = Database::open(&self.config.database_path(), &self.config.database).await?;
		database.migrate().await?;
		let observer = Arc::new(SyncObserver::new(&database));
		observer
			.reconcile(&quiesced.snapshot(), &quiesced.views())
			.await?;

		let channel = EventChannel::spawn();
		old_channel
			.migrate_to(
				&channel,
				HashMap::from([(
					mirror.observer_id,
					Arc::clone(&observer) as Arc<dyn EventObserver>,
				)]),
			)
			.await;
		quiesced.replace_channel(channel);
		drop(quiesced);

		old_channel.shutdown().await;

		let observer_id = mirror.observer_id;
		let previous = std::mem::replace(
			&mut *mirror,
			Mirror {
				database,
				observer,
				observer_id,
			},
		);
		report_error(
			&previous.database.close().await,
			"closing previous mirror database",
		);

		info!(path = %mirror.database.path().display(), "Reloaded mirror database");
		Ok(())
	}
}
