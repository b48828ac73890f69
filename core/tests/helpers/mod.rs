//! Shared fixtures for workspace integration tests

#![allow(dead_code)]

use std::sync::Arc;

use binspect_core::{
	archive::{ArchiveCapabilities, ArchiveTypeRegistry},
	infra::event::{Event, EventObserver},
	Workspace,
};
use sea_orm::JsonValue;
use tempfile::TempDir;
use tokio::sync::Mutex;

/// A workspace in a temporary directory, removed when dropped
pub struct TestWorkspace {
	pub dir: TempDir,
	pub registry: Arc<ArchiveTypeRegistry>,
	pub workspace: Workspace,
}

impl TestWorkspace {
	pub async fn new() -> Self {
		let dir = TempDir::new().unwrap();
		let registry = Arc::new(registry());
		let workspace = Workspace::open(dir.path(), Arc::clone(&registry))
			.await
			.unwrap();

		Self {
			dir,
			registry,
			workspace,
		}
	}

	/// Close the workspace and open it again from disk
	pub async fn reopen(self) -> Self {
		let Self {
			dir,
			registry,
			workspace,
		} = self;
		workspace.close().await.unwrap();

		let workspace = Workspace::open(dir.path(), Arc::clone(&registry))
			.await
			.unwrap();
		Self {
			dir,
			registry,
			workspace,
		}
	}

	/// Every mirrored node row, once the mirror has caught up
	pub async fn rows(&self) -> Vec<JsonValue> {
		self.workspace.flush().await;
		self.workspace
			.query("SELECT id, name, parent_id, resource_id, archive_id FROM file_nodes ORDER BY id")
			.await
			.unwrap()
	}
}

/// Registry with the archive types the tests use
///
/// - `jar`: files only, no nested directories
/// - `sealed`: nothing may change
/// - `zip`: everything allowed
pub fn registry() -> ArchiveTypeRegistry {
	let registry = ArchiveTypeRegistry::new();

	let mut jar = ArchiveCapabilities::permissive("jar");
	jar.add_directory = false;
	registry.register(Arc::new(jar));
	registry.register(Arc::new(ArchiveCapabilities::read_only("sealed")));
	registry.register(Arc::new(ArchiveCapabilities::permissive("zip")));

	registry
}

/// Records every event it observes
#[derive(Default)]
pub struct EventCollector {
	pub events: Mutex<Vec<Event>>,
}

#[async_trait::async_trait]
impl EventObserver for EventCollector {
	async fn on_event(&self, event: &Event) {
		self.events.lock().await.push(event.clone());
	}

	fn name(&self) -> &str {
		"collector"
	}
}

impl EventCollector {
	pub async fn names(&self) -> Vec<String> {
		self.events
			.lock()
			.await
			.iter()
			.map(|event| event.variant_name().to_string())
			.collect()
	}
}
