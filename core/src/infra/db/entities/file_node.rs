use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "file_nodes")]
pub struct Model {
	#[sea_orm(primary_key)]
	pub id: i32,

	/// `FileId` of the node in the in-memory tree
	#[sea_orm(unique)]
	pub tree_id: Uuid,

	pub name: String,

	pub parent_id: Option<i32>,

	pub is_directory: bool,

	pub file_type: Option<String>,

	/// Set for files only
	pub resource_id: Option<i64>,

	/// Set for archive directories only
	pub archive_id: Option<i32>,

	pub created_at: DateTimeUtc,

	pub modified_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
	#[sea_orm(
		belongs_to = "Entity",
		from = "Column::ParentId",
		to = "Column::Id",
		on_delete = "Restrict"
	)]
	Parent,

	#[sea_orm(
		belongs_to = "super::archive_type::Entity",
		from = "Column::ArchiveId",
		to = "super::archive_type::Column::Id",
		on_delete = "Restrict"
	)]
	ArchiveType,

	#[sea_orm(has_many = "super::view::Entity")]
	Views,
}

impl Related<super::archive_type::Entity> for Entity {
	fn to() -> RelationDef {
		Relation::ArchiveType.def()
	}
}

impl Related<super::view::Entity> for Entity {
	fn to() -> RelationDef {
		Relation::Views.def()
	}
}

impl ActiveModelBehavior for ActiveModel {}
