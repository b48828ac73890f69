//! SeaORM entities of the mirror schema

pub mod archive_type;
pub mod file_node;
pub mod view;

pub use archive_type::Entity as ArchiveType;
pub use file_node::Entity as FileNode;
pub use view::Entity as View;
