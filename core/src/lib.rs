//! Workspace engine for binspect
//!
//! A workspace is an in-memory file tree whose file bytes live in a blob
//! store, whose directories can carry archive policies, and whose every
//! committed mutation is published on an ordered event channel. A database
//! observer mirrors those events into SQLite, which doubles as the persisted
//! form of the tree.

pub mod archive;
pub mod config;
pub mod error;
pub mod infra;
pub mod logging;
pub mod resource;
pub mod tree;
pub mod view;
pub mod workspace;

pub use error::{Error, ErrorKind, Result};
pub use workspace::Workspace;
