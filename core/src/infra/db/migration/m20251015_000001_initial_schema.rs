//! Initial mirror schema
//!
//! `file_nodes` is an adjacency list of the tree keyed by database ids, with the
//! stable tree id kept alongside. `views` hangs off files and `archive_types`
//! holds every archive identifier ever bound to a directory.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
	async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
		manager
			.create_table(
				Table::create()
					.table(ArchiveTypes::Table)
					.if_not_exists()
					.col(
						ColumnDef::new(ArchiveTypes::Id)
							.integer()
							.not_null()
							.auto_increment()
							.primary_key(),
					)
					.col(
						ColumnDef::new(ArchiveTypes::Identifier)
							.string()
							.not_null()
							.unique_key(),
					)
					.col(
						ColumnDef::new(ArchiveTypes::RegisteredAt)
							.timestamp_with_time_zone()
							.not_null(),
					)
					.to_owned(),
			)
			.await?;

		manager
			.create_table(
				Table::create()
					.table(FileNodes::Table)
					.if_not_exists()
					.col(
						ColumnDef::new(FileNodes::Id)
							.integer()
							.not_null()
							.auto_increment()
							.primary_key(),
					)
					.col(
						ColumnDef::new(FileNodes::TreeId)
							.uuid()
							.not_null()
							.unique_key(),
					)
					.col(ColumnDef::new(FileNodes::Name).string().not_null())
					.col(ColumnDef::new(FileNodes::ParentId).integer())
					.col(ColumnDef::new(FileNodes::IsDirectory).boolean().not_null())
					.col(ColumnDef::new(FileNodes::FileType).string())
					.col(ColumnDef::new(FileNodes::ResourceId).big_integer())
					.col(ColumnDef::new(FileNodes::ArchiveId).integer())
					.col(
						ColumnDef::new(FileNodes::CreatedAt)
							.timestamp_with_time_zone()
							.not_null(),
					)
					.col(
						ColumnDef::new(FileNodes::ModifiedAt)
							.timestamp_with_time_zone()
							.not_null(),
					)
					// Only directories can be archives, and only files carry content
					.check(Expr::cust("archive_id IS NULL OR is_directory = 1"))
					.check(Expr::cust("(resource_id IS NULL) = (is_directory = 1)"))
					.foreign_key(
						ForeignKey::create()
							.from(FileNodes::Table, FileNodes::ParentId)
							.to(FileNodes::Table, FileNodes::Id)
							.on_delete(ForeignKeyAction::Restrict),
					)
					.foreign_key(
						ForeignKey::create()
							.from(FileNodes::Table, FileNodes::ArchiveId)
							.to(ArchiveTypes::Table, ArchiveTypes::Id)
							.on_delete(ForeignKeyAction::Restrict),
					)
					.to_owned(),
			)
			.await?;

		manager
			.create_table(
				Table::create()
					.table(Views::Table)
					.if_not_exists()
					.col(
						ColumnDef::new(Views::Id)
							.integer()
							.not_null()
							.auto_increment()
							.primary_key(),
					)
					.col(ColumnDef::new(Views::FileId).integer().not_null())
					.col(ColumnDef::new(Views::Generator).string().not_null())
					.col(ColumnDef::new(Views::MediaType).string().not_null())
					.col(ColumnDef::new(Views::ResourceId).big_integer().not_null())
					.col(
						ColumnDef::new(Views::CreatedAt)
							.timestamp_with_time_zone()
							.not_null(),
					)
					.foreign_key(
						ForeignKey::create()
							.from(Views::Table, Views::FileId)
							.to(FileNodes::Table, FileNodes::Id)
							.on_delete(ForeignKeyAction::Cascade),
					)
					.to_owned(),
			)
			.await?;

		manager
			.create_index(
				Index::create()
					.name("idx_file_nodes_parent_id")
					.table(FileNodes::Table)
					.col(FileNodes::ParentId)
					.to_owned(),
			)
			.await?;

		manager
			.create_index(
				Index::create()
					.name("idx_views_file_generator")
					.table(Views::Table)
					.col(Views::FileId)
					.col(Views::Generator)
					.unique()
					.to_owned(),
			)
			.await?;

		Ok(())
	}

	async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
		manager
			.drop_table(Table::drop().table(Views::Table).to_owned())
			.await?;
		manager
			.drop_table(Table::drop().table(FileNodes::Table).to_owned())
			.await?;
		manager
			.drop_table(Table::drop().table(ArchiveTypes::Table).to_owned())
			.await?;

		Ok(())
	}
}

#[derive(DeriveIden)]
enum ArchiveTypes {
	Table,
	Id,
	Identifier,
	RegisteredAt,
}

#[derive(DeriveIden)]
enum FileNodes {
	Table,
	Id,
	TreeId,
	Name,
	ParentId,
	IsDirectory,
	FileType,
	ResourceId,
	ArchiveId,
	CreatedAt,
	ModifiedAt,
}

#[derive(DeriveIden)]
enum Views {
	Table,
	Id,
	FileId,
	Generator,
	MediaType,
	ResourceId,
	CreatedAt,
}
