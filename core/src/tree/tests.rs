use std::sync::Arc;

use pretty_assertions::assert_eq;
use tempfile::TempDir;
use tokio::sync::Mutex;

use super::*;
use crate::{
	archive::ArchiveCapabilities,
	error::ErrorKind,
	infra::event::{EventObserver, ObserverId},
};

#[derive(Default)]
struct Recorder {
	events: Mutex<Vec<Event>>,
}

#[async_trait::async_trait]
impl EventObserver for Recorder {
	async fn on_event(&self, event: &Event) {
		self.events.lock().await.push(event.clone());
	}
}

impl Recorder {
	async fn names(&self) -> Vec<String> {
		self.events
			.lock()
			.await
			.iter()
			.map(|event| event.variant_name().to_string())
			.collect()
	}
}

struct Fixture {
	_dir: TempDir,
	tree: Arc<FileTree>,
	recorder: Arc<Recorder>,
	_observer: ObserverId,
}

impl Fixture {
	async fn new() -> Self {
		let dir = TempDir::new().unwrap();
		let resources =
			ResourceStore::open(dir.path().join("resources"), dir.path().join("index"))
				.await
				.unwrap();
		let channel = EventChannel::spawn();
		let recorder = Arc::new(Recorder::default());
		let observer = channel.subscribe(Arc::clone(&recorder) as _);

		Self {
			_dir: dir,
			tree: Arc::new(FileTree::new(Arc::new(resources), channel)),
			recorder,
			_observer: observer,
		}
	}

	async fn events(&self) -> Vec<String> {
		self.tree.channel().await.flush().await;
		self.recorder.names().await
	}
}

fn archive(f: impl FnOnce(&mut ArchiveCapabilities)) -> Arc<dyn ArchiveType> {
	let mut caps = ArchiveCapabilities::permissive("jar");
	f(&mut caps);
	Arc::new(caps)
}

#[tokio::test]
async fn directory_iff_no_resource() {
	let fx = Fixture::new().await;
	let dir = fx.tree.create_directory("dir", None).await.unwrap();
	let file = fx.tree.create_file("f", Some(dir.id), b"x").await.unwrap();

	for entity in fx.tree.snapshot().await {
		assert_eq!(entity.is_directory(), entity.resource_id().is_none());
	}
	assert_eq!(file.parent, Some(dir.id));
	assert!(file.resource_id().is_some());
}

#[tokio::test]
async fn resolve_nested_path() {
	let fx = Fixture::new().await;
	let dir1 = fx.tree.create_directory("dir1", None).await.unwrap();
	let dir2 = fx.tree.create_directory("dir2", Some(dir1.id)).await.unwrap();
	let file = fx
		.tree
		.create_file("file.txt", Some(dir2.id), b"hi")
		.await
		.unwrap();

	assert_eq!(fx.tree.resolve_path("dir1/dir2/file.txt").await.unwrap(), file);
	assert_eq!(fx.tree.resolve_path("/dir1//dir2/").await.unwrap(), dir2);

	match fx.tree.resolve_path("dir1/missing/file.txt").await {
		Err(Error::PathNotFound { segment, .. }) => assert_eq!(segment, "missing"),
		other => panic!("unexpected {other:?}"),
	}
	// a file has no children to descend into
	assert_eq!(
		fx.tree
			.resolve_path("dir1/dir2/file.txt/x")
			.await
			.unwrap_err()
			.kind(),
		ErrorKind::NotFound
	);
	assert_eq!(
		fx.tree.resolve_path("").await.unwrap_err().kind(),
		ErrorKind::NotFound
	);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn resolve_unaffected_by_concurrent_rename() {
	let fx = Fixture::new().await;
	let dir1 = fx.tree.create_directory("dir1", None).await.unwrap();
	let dir2 = fx.tree.create_directory("dir2", Some(dir1.id)).await.unwrap();
	let file = fx
		.tree
		.create_file("file.txt", Some(dir2.id), b"hi")
		.await
		.unwrap();
	let other = fx.tree.create_file("other", None, b"").await.unwrap();

	let renamer = {
		let tree = Arc::clone(&fx.tree);
		tokio::spawn(async move {
			for i in 0..50 {
				tree.rename(other.id, &format!("other-{i}")).await.unwrap();
			}
		})
	};

	for _ in 0..50 {
		assert_eq!(
			fx.tree.resolve_path("dir1/dir2/file.txt").await.unwrap().id,
			file.id
		);
	}
	renamer.await.unwrap();
}

#[tokio::test]
async fn sibling_names_are_unique_and_valid() {
	let fx = Fixture::new().await;
	fx.tree.create_file("a", None, b"").await.unwrap();

	for (name, kind) in [
		("a", ErrorKind::InvariantViolation),
		("", ErrorKind::InvariantViolation),
		("x/y", ErrorKind::InvariantViolation),
	] {
		assert_eq!(
			fx.tree.create_directory(name, None).await.unwrap_err().kind(),
			kind
		);
	}

	let b = fx.tree.create_file("b", None, b"").await.unwrap();
	assert!(matches!(
		fx.tree.rename(b.id, "a").await,
		Err(Error::NameTaken(name)) if name == "a"
	));
	assert_eq!(fx.tree.rename(b.id, "b").await.unwrap(), b);
}

#[tokio::test]
async fn children_and_roots_are_name_ordered() {
	let fx = Fixture::new().await;
	let dir = fx.tree.create_directory("dir", None).await.unwrap();
	for name in ["c", "a", "b"] {
		fx.tree.create_file(name, Some(dir.id), b"").await.unwrap();
	}
	fx.tree.create_file("0", None, b"").await.unwrap();

	let names = |entities: Vec<FileEntity>| {
		entities
			.into_iter()
			.map(|entity| entity.name)
			.collect::<Vec<_>>()
	};
	assert_eq!(names(fx.tree.children(dir.id).await.unwrap()), ["a", "b", "c"]);
	assert_eq!(names(fx.tree.list_roots().await), ["0", "dir"]);
}

#[tokio::test]
async fn update_content_replaces_bytes_and_drops_views() {
	let fx = Fixture::new().await;
	let file = fx.tree.create_file("a.class", None, b"old").await.unwrap();
	let resource_id = file.resource_id().unwrap();

	let view = fx
		.tree
		.views()
		.put(file.id, "hex".into(), "text/plain", b"6f6c64")
		.await
		.unwrap();

	let updated = fx.tree.update_content(file.id, b"new").await.unwrap();
	assert_eq!(updated.resource_id(), Some(resource_id));
	assert_eq!(
		fx.tree.resources().read_bytes(resource_id).await.unwrap(),
		b"new"
	);
	assert!(fx.tree.views().get(file.id, &view.generator).await.is_none());
	assert!(!fx.tree.resources().exists(view.resource_id).await.unwrap());

	assert_eq!(
		fx.events().await,
		["FileCreated", "ViewCreated", "ViewDeleted", "FileUpdated"]
	);
}

#[tokio::test]
async fn directories_have_no_content() {
	let fx = Fixture::new().await;
	let dir = fx.tree.create_directory("dir", None).await.unwrap();

	assert!(matches!(
		fx.tree.update_content(dir.id, b"x").await,
		Err(Error::IsDirectory(id)) if id == dir.id
	));
	let file = fx.tree.create_file("f", None, b"").await.unwrap();
	assert!(matches!(
		fx.tree.create_file("g", Some(file.id), b"").await,
		Err(Error::NotADirectory(_))
	));
}

#[tokio::test]
async fn delete_removes_resource_and_views() {
	let fx = Fixture::new().await;
	let file = fx.tree.create_file("a", None, b"bytes").await.unwrap();
	let resource_id = file.resource_id().unwrap();
	fx.tree
		.views()
		.put(file.id, "hex".into(), "text/plain", b"")
		.await
		.unwrap();

	fx.tree.delete(file.id).await.unwrap();

	assert!(!fx.tree.resources().exists(resource_id).await.unwrap());
	assert!(fx.tree.views().list(file.id).await.is_empty());
	assert_eq!(
		fx.tree.get(file.id).await.unwrap_err().kind(),
		ErrorKind::NotFound
	);
	assert_eq!(
		fx.tree
			.lookup_by_resource_id(resource_id)
			.await
			.unwrap_err()
			.kind(),
		ErrorKind::NotFound
	);
	assert_eq!(
		fx.events().await,
		["FileCreated", "ViewCreated", "ViewDeleted", "FileDeleted"]
	);
}

#[tokio::test]
async fn non_empty_directory_cannot_be_deleted() {
	let fx = Fixture::new().await;
	let dir = fx.tree.create_directory("dir", None).await.unwrap();
	let file = fx.tree.create_file("f", Some(dir.id), b"").await.unwrap();

	assert!(matches!(
		fx.tree.delete(dir.id).await,
		Err(Error::DirectoryNotEmpty(id)) if id == dir.id
	));

	fx.tree.delete(file.id).await.unwrap();
	fx.tree.delete(dir.id).await.unwrap();
	assert!(fx.tree.snapshot().await.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn delete_cannot_race_creation() {
	for _ in 0..20 {
		let fx = Fixture::new().await;
		let dir = fx.tree.create_directory("dir", None).await.unwrap();

		let creator = {
			let tree = Arc::clone(&fx.tree);
			tokio::spawn(async move { tree.create_file("f", Some(dir.id), b"x").await })
		};
		let deleter = {
			let tree = Arc::clone(&fx.tree);
			tokio::spawn(async move { tree.delete(dir.id).await })
		};

		let created = creator.await.unwrap();
		let deleted = deleter.await.unwrap();

		// exactly one of them wins, and never leaves a child without its parent
		match (created, deleted) {
			(Ok(file), Err(Error::DirectoryNotEmpty(_))) => {
				assert_eq!(fx.tree.get(file.id).await.unwrap().parent, Some(dir.id));
			}
			(Err(Error::FileNotFound(_)), Ok(())) => {
				assert!(fx.tree.snapshot().await.is_empty());
			}
			other => panic!("unexpected outcome {other:?}"),
		}
	}
}

#[tokio::test]
async fn move_between_directories() {
	let fx = Fixture::new().await;
	let a = fx.tree.create_directory("a", None).await.unwrap();
	let b = fx.tree.create_directory("b", None).await.unwrap();
	let file = fx.tree.create_file("f", Some(a.id), b"").await.unwrap();

	let moved = fx.tree.move_to(file.id, Some(b.id)).await.unwrap();
	assert_eq!(moved.parent, Some(b.id));
	assert!(fx.tree.children(a.id).await.unwrap().is_empty());
	assert_eq!(fx.tree.resolve_path("b/f").await.unwrap().id, file.id);

	let moved = fx.tree.move_to(file.id, None).await.unwrap();
	assert_eq!(moved.parent, None);
	assert_eq!(fx.tree.resolve_path("f").await.unwrap().id, file.id);

	// same parent is a no-op without an event
	fx.tree.move_to(file.id, None).await.unwrap();
	assert_eq!(
		fx.events().await,
		["FileCreated", "FileCreated", "FileCreated", "FileMoved", "FileMoved"]
	);
}

#[tokio::test]
async fn move_into_own_subtree_is_rejected() {
	let fx = Fixture::new().await;
	let a = fx.tree.create_directory("a", None).await.unwrap();
	let b = fx.tree.create_directory("b", Some(a.id)).await.unwrap();

	assert!(matches!(
		fx.tree.move_to(a.id, Some(b.id)).await,
		Err(Error::MoveIntoOwnSubtree(id)) if id == a.id
	));
	assert!(matches!(
		fx.tree.move_to(a.id, Some(a.id)).await,
		Err(Error::MoveIntoOwnSubtree(_))
	));
}

#[tokio::test]
async fn archive_policy_gates_mutations() {
	let fx = Fixture::new().await;
	let root = fx.tree.create_directory("root", None).await.unwrap();
	let inner = fx.tree.create_directory("inner", Some(root.id)).await.unwrap();
	let file = fx.tree.create_file("a", Some(inner.id), b"").await.unwrap();
	let before = fx.tree.snapshot().await;

	fx.tree
		.mark_as_archive(
			root.id,
			archive(|c| {
				c.add_file = false;
				c.delete_file = false;
			}),
		)
		.await
		.unwrap();

	assert!(!fx.tree.can_add_file(Some(inner.id)).await);
	assert!(fx.tree.can_add_directory(Some(inner.id)).await);
	assert!(fx.tree.can_add_file(None).await);

	let next_resource = fx.tree.resources().allocate(b"probe").await.unwrap();
	assert_eq!(
		fx.tree
			.create_file("b", Some(inner.id), b"")
			.await
			.unwrap_err()
			.kind(),
		ErrorKind::PolicyViolation
	);
	// the rejected creation allocated nothing
	assert_eq!(
		fx.tree.resources().allocate(b"probe").await.unwrap().get(),
		next_resource.get() + 1
	);

	assert_eq!(
		fx.tree.delete(file.id).await.unwrap_err().kind(),
		ErrorKind::PolicyViolation
	);
	// leaving the archive counts as deleting from it
	assert_eq!(
		fx.tree.move_to(file.id, None).await.unwrap_err().kind(),
		ErrorKind::PolicyViolation
	);

	let mut after = fx.tree.snapshot().await;
	after[0].kind = before[0].kind.clone();
	assert_eq!(after, before);
}

#[tokio::test]
async fn nearest_archive_is_innermost() {
	let fx = Fixture::new().await;
	let outer = fx.tree.create_directory("outer", None).await.unwrap();
	let inner = fx.tree.create_directory("inner", Some(outer.id)).await.unwrap();
	let file = fx.tree.create_file("f", Some(inner.id), b"").await.unwrap();

	assert!(fx.tree.nearest_archive(file.id).await.unwrap().is_none());

	fx.tree
		.mark_as_archive(outer.id, Arc::new(ArchiveCapabilities::permissive("zip")))
		.await
		.unwrap();
	fx.tree
		.mark_as_archive(inner.id, Arc::new(ArchiveCapabilities::read_only("jar")))
		.await
		.unwrap();

	let nearest = fx.tree.nearest_archive(file.id).await.unwrap().unwrap();
	assert_eq!(nearest.root, inner.id);
	assert_eq!(nearest.archive_type.identifier(), "jar");
	assert!(fx.tree.can_add_file(Some(outer.id)).await);
	assert!(!fx.tree.can_move_file(Some(inner.id)).await);
	assert!(!fx.tree.can_delete_file(Some(inner.id)).await);

	assert!(matches!(
		fx.tree
			.mark_as_archive(file.id, Arc::new(ArchiveCapabilities::permissive("zip")))
			.await,
		Err(Error::NotADirectory(_))
	));
}

#[tokio::test]
async fn create_from_scratch_checks_contents() {
	let fx = Fixture::new().await;
	let dir = fx.tree.create_directory("dir", None).await.unwrap();
	fx.tree.create_directory("sub", Some(dir.id)).await.unwrap();

	assert_eq!(
		fx.tree
			.create_from_scratch(dir.id, archive(|c| c.add_directory = false))
			.await
			.unwrap_err()
			.kind(),
		ErrorKind::PolicyViolation
	);
	assert_eq!(fx.tree.get(dir.id).await.unwrap().archive_type(), None);

	let marked = fx
		.tree
		.create_from_scratch(dir.id, archive(|c| c.add_file = false))
		.await
		.unwrap();
	assert_eq!(marked.archive_type(), Some("jar"));
	assert_eq!(
		fx.events().await,
		["FileCreated", "FileCreated", "ArchiveCreated"]
	);
}

#[tokio::test]
async fn set_file_type_emits_update() {
	let fx = Fixture::new().await;
	let file = fx.tree.create_file("Main.class", None, b"").await.unwrap();

	let tagged = fx
		.tree
		.set_file_type(file.id, Some("java-class".into()))
		.await
		.unwrap();
	assert_eq!(tagged.file_type.as_deref(), Some("java-class"));
	assert_eq!(fx.tree.get(file.id).await.unwrap(), tagged);
	assert_eq!(fx.events().await, ["FileCreated", "FileUpdated"]);
}

#[tokio::test]
async fn lookup_by_resource() {
	let fx = Fixture::new().await;
	let file = fx.tree.create_file("a", None, b"x").await.unwrap();

	assert_eq!(
		fx.tree
			.lookup_by_resource_id(file.resource_id().unwrap())
			.await
			.unwrap(),
		file
	);
}

#[tokio::test]
async fn snapshot_lists_parents_first() {
	let fx = Fixture::new().await;
	let z = fx.tree.create_directory("z", None).await.unwrap();
	let a = fx.tree.create_directory("a", Some(z.id)).await.unwrap();
	fx.tree.create_file("f", Some(a.id), b"").await.unwrap();
	fx.tree.create_file("b", None, b"").await.unwrap();

	let snapshot = fx.tree.snapshot().await;
	for (i, entity) in snapshot.iter().enumerate() {
		if let Some(parent) = entity.parent {
			assert!(snapshot[..i].iter().any(|earlier| earlier.id == parent));
		}
	}
	assert_eq!(snapshot.len(), 4);
}

#[tokio::test]
async fn restore_skips_broken_nodes() {
	let fx = Fixture::new().await;
	let dir = FileEntity {
		id: FileId::new(),
		name: "dir".into(),
		parent: None,
		file_type: None,
		kind: EntityKind::Directory { archive_type: None },
	};
	let file = |name: &str, parent| FileEntity {
		id: FileId::new(),
		name: name.into(),
		parent,
		file_type: None,
		kind: EntityKind::File {
			resource_id: ResourceId::new(1).unwrap(),
		},
	};
	let ok = file("ok", Some(dir.id));
	let orphan = file("orphan", Some(FileId::new()));
	let duplicate = file("ok", Some(dir.id));

	let nodes = [dir.clone(), ok.clone(), orphan, duplicate]
		.into_iter()
		.map(|entity| RestoredNode {
			entity,
			archive_type: None,
		});
	let restored = FileTree::restore(
		Arc::clone(fx.tree.resources()),
		EventChannel::spawn(),
		nodes,
		Vec::<ViewEntity>::new(),
	);

	assert_eq!(restored.snapshot().await, [dir, ok]);
}

#[tokio::test]
async fn quiesced_tree_swaps_channel() {
	let fx = Fixture::new().await;
	fx.tree.create_file("a", None, b"").await.unwrap();

	let replacement = EventChannel::spawn();
	let previous = {
		let mut quiesced = fx.tree.quiesce().await;
		assert_eq!(quiesced.snapshot().len(), 1);
		quiesced.replace_channel(replacement.clone())
	};
	previous.flush().await;

	fx.tree.create_file("b", None, b"").await.unwrap();
	previous.flush().await;
	// the recorder stayed on the old channel
	assert_eq!(fx.recorder.names().await, ["FileCreated"]);
}
