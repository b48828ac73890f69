use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Registered archive type identifiers. Rows are never deleted, so a type
/// keeps its id across plugin unload and reload.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "archive_types")]
pub struct Model {
	#[sea_orm(primary_key)]
	pub id: i32,

	#[sea_orm(unique)]
	pub identifier: String,

	pub registered_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
	#[sea_orm(has_many = "super::file_node::Entity")]
	FileNodes,
}

impl Related<super::file_node::Entity> for Entity {
	fn to() -> RelationDef {
		Relation::FileNodes.def()
	}
}

impl ActiveModelBehavior for ActiveModel {}
