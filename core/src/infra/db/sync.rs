//! Mirrors tree events into the relational tables
//!
//! The observer runs on the event channel's sequencer, so it sees mutations in
//! commit order: a parent's row is always written before any of its children's.
//! Failures are logged and never reach the tree.

use std::{
	cmp::Reverse,
	collections::{HashMap, HashSet, VecDeque},
	sync::{Mutex, RwLock},
};

use chrono::Utc;
use sea_orm::{
	sea_query::Expr, ActiveModelTrait, ActiveValue::NotSet, ColumnTrait, ConnectionTrait,
	DatabaseConnection, DbErr, EntityTrait, FromQueryResult, JsonValue, QueryFilter, Set,
	Statement, TransactionTrait,
};
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

use super::{
	entities::{archive_type, file_node, view},
	Database,
};
use crate::{
	archive::ArchiveTypeRegistry,
	error::{Error, Result},
	infra::event::{Event, EventObserver},
	resource::ResourceId,
	tree::{EntityKind, FileEntity, FileId, RestoredNode},
	view::{GeneratorType, ViewEntity},
};

/// Statement keywords accepted by [`SyncObserver::query_raw`]
const READ_ONLY_KEYWORDS: [&str; 3] = ["SELECT", "WITH", "EXPLAIN"];

#[derive(Error, Debug)]
pub enum SyncError {
	#[error("file {0} has no mirrored row")]
	Unmirrored(FileId),
	#[error("resource id {0} does not fit the mirror column")]
	ResourceIdOverflow(ResourceId),
	#[error(transparent)]
	Database(#[from] DbErr),
}

/// Tree nodes and views read back from the mirror, parents before children
pub struct MirroredTree {
	pub nodes: Vec<RestoredNode>,
	pub views: Vec<ViewEntity>,
}

pub struct SyncObserver {
	conn: DatabaseConnection,
	/// Read-only pool, see [`Database::reader`]
	reader: DatabaseConnection,
	/// Tree id -> database id of every mirrored node
	ids: RwLock<HashMap<FileId, i32>>,
	/// Archive identifier -> `archive_types` row id
	archive_ids: Mutex<HashMap<String, i32>>,
}

impl SyncObserver {
	pub fn new(database: &Database) -> Self {
		Self {
			conn: database.conn().clone(),
			reader: database.reader().clone(),
			ids: RwLock::new(HashMap::new()),
			archive_ids: Mutex::new(HashMap::new()),
		}
	}

	/// Database id assigned to `file` when its row was first inserted
	pub fn database_id(&self, file: FileId) -> Option<i32> {
		self.ids
			.read()
			.unwrap_or_else(|poisoned| poisoned.into_inner())
			.get(&file)
			.copied()
	}

	fn record_id(&self, file: FileId, id: i32) {
		self.ids
			.write()
			.unwrap_or_else(|poisoned| poisoned.into_inner())
			.insert(file, id);
	}

	fn forget_id(&self, file: FileId) -> Option<i32> {
		self.ids
			.write()
			.unwrap_or_else(|poisoned| poisoned.into_inner())
			.remove(&file)
	}

	fn require_id(&self, file: FileId) -> std::result::Result<i32, SyncError> {
		self.database_id(file).ok_or(SyncError::Unmirrored(file))
	}

	fn parent_id(&self, parent: Option<FileId>) -> std::result::Result<Option<i32>, SyncError> {
		parent.map(|parent| self.require_id(parent)).transpose()
	}

	/// Row id of `identifier` in `archive_types`, registering it on first use
	pub async fn archive_type_id(&self, identifier: &str) -> std::result::Result<i32, SyncError> {
		if let Some(id) = self
			.archive_ids
			.lock()
			.unwrap_or_else(|poisoned| poisoned.into_inner())
			.get(identifier)
		{
			return Ok(*id);
		}

		let id = match archive_type::Entity::find()
			.filter(archive_type::Column::Identifier.eq(identifier))
			.one(&self.conn)
			.await?
		{
			Some(row) => row.id,
			None => {
				let row = archive_type::ActiveModel {
					id: NotSet,
					identifier: Set(identifier.to_string()),
					registered_at: Set(Utc::now()),
				}
				.insert(&self.conn)
				.await?;
				info!(%identifier, id = row.id, "Registered archive type in mirror");
				row.id
			}
		};

		self.archive_ids
			.lock()
			.unwrap_or_else(|poisoned| poisoned.into_inner())
			.insert(identifier.to_string(), id);

		Ok(id)
	}

	/// Read every mirrored node and view, seeding the id map on the way.
	///
	/// Rows unreachable from a root are dropped with a warning. Directories whose
	/// archive type is not registered come back unmarked.
	pub async fn load(
		&self,
		registry: &ArchiveTypeRegistry,
	) -> std::result::Result<MirroredTree, SyncError> {
		let archive_rows = archive_type::Entity::find().all(&self.conn).await?;
		let identifiers = archive_rows
			.iter()
			.map(|row| (row.id, row.identifier.clone()))
			.collect::<HashMap<_, _>>();
		self.archive_ids
			.lock()
			.unwrap_or_else(|poisoned| poisoned.into_inner())
			.extend(archive_rows.into_iter().map(|row| (row.identifier, row.id)));

		let rows = file_node::Entity::find().all(&self.conn).await?;
		let total = rows.len();

		let mut by_parent = HashMap::<Option<i32>, Vec<file_node::Model>>::new();
		for row in rows {
			by_parent.entry(row.parent_id).or_default().push(row);
		}

		let mut tree_ids = HashMap::<i32, FileId>::with_capacity(total);
		let mut nodes = Vec::with_capacity(total);
		let mut queue = by_parent.remove(&None).unwrap_or_default().into_iter().collect::<VecDeque<_>>();

		while let Some(row) = queue.pop_front() {
			let id = FileId::from_uuid(row.tree_id);
			let parent = row.parent_id.and_then(|parent| tree_ids.get(&parent).copied());

			let kind = if row.is_directory {
				EntityKind::Directory {
					archive_type: row
						.archive_id
						.and_then(|archive_id| identifiers.get(&archive_id).cloned()),
				}
			} else {
				let Some(resource_id) = row
					.resource_id
					.and_then(|raw| u64::try_from(raw).ok())
					.and_then(ResourceId::new)
				else {
					warn!(file = %id, row = row.id, "Skipping file row without a valid resource id");
					continue;
				};
				EntityKind::File { resource_id }
			};

			let archive_type = match &kind {
				EntityKind::Directory {
					archive_type: Some(identifier),
				} => {
					let resolved = registry.get(identifier);
					if resolved.is_none() {
						warn!(
							directory = %id,
							%identifier,
							"Archive type is not registered, restoring directory unmarked"
						);
					}
					resolved
				}
				_ => None,
			};
			let kind = match kind {
				EntityKind::Directory { .. } => EntityKind::Directory {
					archive_type: archive_type
						.as_ref()
						.map(|archive_type| archive_type.identifier().to_string()),
				},
				file => file,
			};

			tree_ids.insert(row.id, id);
			self.record_id(id, row.id);
			if let Some(children) = by_parent.remove(&Some(row.id)) {
				queue.extend(children);
			}

			nodes.push(RestoredNode {
				entity: FileEntity {
					id,
					name: row.name,
					parent,
					file_type: row.file_type,
					kind,
				},
				archive_type,
			});
		}

		let unreachable = total - nodes.len();
		if unreachable > 0 {
			warn!(unreachable, "Mirror contains rows unreachable from any root");
		}

		let views = view::Entity::find()
			.all(&self.conn)
			.await?
			.into_iter()
			.filter_map(|row| {
				let file = tree_ids.get(&row.file_id).copied()?;
				let resource_id = u64::try_from(row.resource_id)
					.ok()
					.and_then(ResourceId::new)?;
				Some(ViewEntity {
					file,
					generator: GeneratorType::new(row.generator),
					media_type: row.media_type,
					resource_id,
					created_at: row.created_at,
				})
			})
			.collect();

		info!(nodes = nodes.len(), "Loaded tree from mirror");

		Ok(MirroredTree { nodes, views })
	}

	/// Bring the mirror in line with a parent-first snapshot of the tree:
	/// rows it is missing are inserted, changed rows updated and rows the tree no
	/// longer has deleted. Returns how many rows were written.
	pub async fn reconcile(
		&self,
		snapshot: &[FileEntity],
		views: &[ViewEntity],
	) -> std::result::Result<usize, SyncError> {
		let mut written = 0;

		for entity in snapshot {
			let existing = file_node::Entity::find()
				.filter(file_node::Column::TreeId.eq(*entity.id.as_uuid()))
				.one(&self.conn)
				.await?;
			match existing {
				Some(row) => {
					self.record_id(entity.id, row.id);
					let parent_id = self.parent_id(entity.parent)?;
					let archive_id = self.archive_id_of(entity).await?;
					if row.name != entity.name
						|| row.parent_id != parent_id
						|| row.file_type != entity.file_type
						|| row.archive_id != archive_id
					{
						file_node::Entity::update_many()
							.col_expr(file_node::Column::Name, Expr::value(entity.name.clone()))
							.col_expr(file_node::Column::ParentId, Expr::value(parent_id))
							.col_expr(
								file_node::Column::FileType,
								Expr::value(entity.file_type.clone()),
							)
							.col_expr(file_node::Column::ArchiveId, Expr::value(archive_id))
							.col_expr(file_node::Column::ModifiedAt, Expr::value(Utc::now()))
							.filter(file_node::Column::Id.eq(row.id))
							.exec(&self.conn)
							.await?;
						written += 1;
					}
				}
				None => {
					self.insert_node(entity).await?;
					written += 1;
				}
			}
		}

		let mut live_views = HashSet::with_capacity(views.len());
		for view in views {
			let file_id = self.require_id(view.file)?;
			live_views.insert((file_id, view.generator.as_str()));
			let exists = view::Entity::find()
				.filter(view::Column::FileId.eq(file_id))
				.filter(view::Column::Generator.eq(view.generator.as_str()))
				.one(&self.conn)
				.await?
				.is_some();
			if !exists {
				self.insert_view(view).await?;
				written += 1;
			}
		}

		// Rows the tree no longer has, left behind by deletions that failed to mirror
		for row in view::Entity::find().all(&self.conn).await? {
			if !live_views.contains(&(row.file_id, row.generator.as_str())) {
				view::Entity::delete_by_id(row.id).exec(&self.conn).await?;
				written += 1;
			}
		}

		let live_nodes = snapshot
			.iter()
			.map(|entity| *entity.id.as_uuid())
			.collect::<HashSet<_>>();
		let rows = file_node::Entity::find().all(&self.conn).await?;
		let parents = rows
			.iter()
			.map(|row| (row.id, row.parent_id))
			.collect::<HashMap<_, _>>();
		let mut stale = rows
			.into_iter()
			.filter(|row| !live_nodes.contains(&row.tree_id))
			.map(|row| (depth(&parents, row.id), row))
			.collect::<Vec<_>>();
		// children first, parent_id is ON DELETE RESTRICT
		stale.sort_by_key(|(depth, _)| Reverse(*depth));
		for (_, row) in stale {
			self.forget_id(FileId::from_uuid(row.tree_id));
			file_node::Entity::delete_by_id(row.id)
				.exec(&self.conn)
				.await?;
			debug!(row = row.id, name = %row.name, "Removed stale mirror row");
			written += 1;
		}

		info!(written, "Reconciled mirror with tree snapshot");
		Ok(written)
	}

	/// Run an ad hoc diagnostic query, one JSON object per row.
	///
	/// Only read statements are accepted; the query runs on the read-only pool
	/// inside a transaction that is always rolled back.
	pub async fn query_raw(&self, sql: &str) -> Result<Vec<JsonValue>> {
		if !is_read_only(sql) {
			return Err(Error::ReadOnlyQuery);
		}

		let txn = self.reader.begin().await?;
		let rows = JsonValue::find_by_statement(Statement::from_string(
			self.reader.get_database_backend(),
			sql,
		))
		.all(&txn)
		.await;
		txn.rollback().await?;

		rows.map_err(|e| {
			if e.to_string().contains("readonly") {
				Error::ReadOnlyQuery
			} else {
				Error::Database(e)
			}
		})
	}

	async fn mirror(&self, event: &Event) -> std::result::Result<(), SyncError> {
		match event {
			Event::FileCreated { file } => {
				let id = self.insert_node(file).await?;
				debug!(file = %file.id, id, "Mirrored new node");
			}

			Event::FileUpdated { file } => {
				let id = self.require_id(file.id)?;
				file_node::Entity::update_many()
					.col_expr(
						file_node::Column::FileType,
						Expr::value(file.file_type.clone()),
					)
					.col_expr(file_node::Column::ModifiedAt, Expr::value(Utc::now()))
					.filter(file_node::Column::Id.eq(id))
					.exec(&self.conn)
					.await?;
			}

			Event::FileRenamed { file, new_name, .. } => {
				let id = self.require_id(*file)?;
				file_node::Entity::update_many()
					.col_expr(file_node::Column::Name, Expr::value(new_name.clone()))
					.col_expr(file_node::Column::ModifiedAt, Expr::value(Utc::now()))
					.filter(file_node::Column::Id.eq(id))
					.exec(&self.conn)
					.await?;
			}

			Event::FileMoved {
				file, new_parent, ..
			} => {
				let id = self.require_id(*file)?;
				let parent_id = self.parent_id(*new_parent)?;
				file_node::Entity::update_many()
					.col_expr(file_node::Column::ParentId, Expr::value(parent_id))
					.col_expr(file_node::Column::ModifiedAt, Expr::value(Utc::now()))
					.filter(file_node::Column::Id.eq(id))
					.exec(&self.conn)
					.await?;
			}

			Event::FileDeleted { file } => {
				let id = self.forget_id(*file).ok_or(SyncError::Unmirrored(*file))?;
				file_node::Entity::delete_by_id(id)
					.exec(&self.conn)
					.await?;
			}

			Event::ViewCreated { view } => self.insert_view(view).await?,

			Event::ViewDeleted { file, generator } => {
				// The row is already gone if its file was deleted first
				if let Some(file_id) = self.database_id(*file) {
					view::Entity::delete_many()
						.filter(view::Column::FileId.eq(file_id))
						.filter(view::Column::Generator.eq(generator.as_str()))
						.exec(&self.conn)
						.await?;
				}
			}

			Event::ArchiveCreated {
				directory,
				archive_type,
			} => {
				let id = self.require_id(*directory)?;
				let archive_id = self.archive_type_id(archive_type).await?;
				file_node::Entity::update_many()
					.col_expr(file_node::Column::ArchiveId, Expr::value(archive_id))
					.col_expr(file_node::Column::ModifiedAt, Expr::value(Utc::now()))
					.filter(file_node::Column::Id.eq(id))
					.exec(&self.conn)
					.await?;
			}
		}

		Ok(())
	}

	async fn archive_id_of(&self, entity: &FileEntity) -> std::result::Result<Option<i32>, SyncError> {
		match entity.archive_type() {
			Some(identifier) => self.archive_type_id(identifier).await.map(Some),
			None => Ok(None),
		}
	}

	async fn insert_node(&self, entity: &FileEntity) -> std::result::Result<i32, SyncError> {
		let parent_id = self.parent_id(entity.parent)?;
		let archive_id = self.archive_id_of(entity).await?;
		let resource_id = entity.resource_id().map(column_resource_id).transpose()?;
		let now = Utc::now();

		let row = file_node::ActiveModel {
			id: NotSet,
			tree_id: Set(*entity.id.as_uuid()),
			name: Set(entity.name.clone()),
			parent_id: Set(parent_id),
			is_directory: Set(entity.is_directory()),
			file_type: Set(entity.file_type.clone()),
			resource_id: Set(resource_id),
			archive_id: Set(archive_id),
			created_at: Set(now),
			modified_at: Set(now),
		}
		.insert(&self.conn)
		.await?;

		self.record_id(entity.id, row.id);
		Ok(row.id)
	}

	async fn insert_view(&self, view: &ViewEntity) -> std::result::Result<(), SyncError> {
		let file_id = self.require_id(view.file)?;

		let row = view::ActiveModel {
			id: NotSet,
			file_id: Set(file_id),
			generator: Set(view.generator.as_str().to_string()),
			media_type: Set(view.media_type.clone()),
			resource_id: Set(column_resource_id(view.resource_id)?),
			created_at: Set(view.created_at),
		}
		.insert(&self.conn)
		.await?;

		trace!(file = %view.file, generator = %view.generator, id = row.id, "Mirrored view");
		Ok(())
	}
}

#[async_trait::async_trait]
impl EventObserver for SyncObserver {
	async fn on_event(&self, event: &Event) {
		if let Err(e) = self.mirror(event).await {
			error!(
				event = event.variant_name(),
				file = %event.file_id(),
				?e,
				"Failed to mirror event"
			);
		}
	}

	fn name(&self) -> &str {
		"db_sync"
	}
}

fn column_resource_id(resource_id: ResourceId) -> std::result::Result<i64, SyncError> {
	i64::try_from(resource_id.get()).map_err(|_| SyncError::ResourceIdOverflow(resource_id))
}

/// Number of ancestors of row `id`, stopping at a broken link or a cycle
fn depth(parents: &HashMap<i32, Option<i32>>, mut id: i32) -> usize {
	let mut depth = 0;
	while let Some(Some(parent)) = parents.get(&id) {
		depth += 1;
		if depth > parents.len() {
			break;
		}
		id = *parent;
	}
	depth
}

fn is_read_only(sql: &str) -> bool {
	let statement = sql.trim().trim_end_matches(';');
	if statement.contains(';') {
		return false;
	}

	statement
		.split_whitespace()
		.next()
		.is_some_and(|keyword| {
			READ_ONLY_KEYWORDS
				.iter()
				.any(|allowed| keyword.eq_ignore_ascii_case(allowed))
		})
}
