use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "views")]
pub struct Model {
	#[sea_orm(primary_key)]
	pub id: i32,

	pub file_id: i32,

	pub generator: String,

	pub media_type: String,

	pub resource_id: i64,

	pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
	#[sea_orm(
		belongs_to = "super::file_node::Entity",
		from = "Column::FileId",
		to = "super::file_node::Column::Id",
		on_delete = "Cascade"
	)]
	FileNode,
}

impl Related<super::file_node::Entity> for Entity {
	fn to() -> RelationDef {
		Relation::FileNode.def()
	}
}

impl ActiveModelBehavior for ActiveModel {}
