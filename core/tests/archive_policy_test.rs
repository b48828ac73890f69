//! End-to-end archive policy checks through an opened workspace

mod helpers;

use std::sync::Arc;

use binspect_core::{
	infra::event::{Event, EventObserver},
	Error, ErrorKind,
};
use helpers::{EventCollector, TestWorkspace};

#[tokio::test]
async fn jar_root_accepts_files_but_not_directories() {
	let ws = TestWorkspace::new().await;
	let collector = Arc::new(EventCollector::default());
	ws.workspace
		.subscribe(Arc::clone(&collector) as Arc<dyn EventObserver>)
		.await;
	let tree = ws.workspace.tree();

	let root = tree.create_directory("root", None).await.unwrap();
	ws.workspace
		.mark_as_archive_by_id(root.id, "jar")
		.await
		.unwrap();

	let err = tree.create_directory("sub", Some(root.id)).await.unwrap_err();
	assert_eq!(err.kind(), ErrorKind::PolicyViolation);
	assert!(tree.resolve_path("root/sub").await.is_err());

	let file = tree
		.create_file("a.txt", Some(root.id), b"hi")
		.await
		.unwrap();
	assert_eq!(file.parent, Some(root.id));

	let rows = ws.rows().await;
	let root_id = ws.workspace.database_id(root.id).await.unwrap();
	let file_id = ws.workspace.database_id(file.id).await.unwrap();
	let row = rows
		.iter()
		.find(|row| row["id"].as_i64() == Some(i64::from(file_id)))
		.unwrap();
	assert_eq!(row["name"], "a.txt");
	assert_eq!(row["parent_id"].as_i64(), Some(i64::from(root_id)));

	let events = collector.events.lock().await;
	assert!(matches!(
		events.last(),
		Some(Event::FileCreated { file: created }) if created.id == file.id
	));
	// the rejected directory never produced an event
	assert_eq!(
		events
			.iter()
			.filter(|event| matches!(event, Event::FileCreated { .. }))
			.count(),
		2
	);
}

#[tokio::test]
async fn rejected_creation_allocates_nothing() {
	let ws = TestWorkspace::new().await;
	let tree = ws.workspace.tree();

	let sealed = tree.create_directory("sealed", None).await.unwrap();
	ws.workspace
		.mark_as_archive_by_id(sealed.id, "sealed")
		.await
		.unwrap();

	let probe = ws.workspace.resources().allocate(b"").await.unwrap();
	let err = tree
		.create_file("x", Some(sealed.id), b"payload")
		.await
		.unwrap_err();
	assert!(matches!(err, Error::PolicyViolation { ref archive_type, .. } if archive_type == "sealed"));

	let next = ws.workspace.resources().allocate(b"").await.unwrap();
	assert_eq!(next.get(), probe.get() + 1);
	assert!(tree.children(sealed.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn unknown_archive_type_is_not_found() {
	let ws = TestWorkspace::new().await;
	let dir = ws
		.workspace
		.tree()
		.create_directory("dir", None)
		.await
		.unwrap();

	let err = ws
		.workspace
		.mark_as_archive_by_id(dir.id, "rar")
		.await
		.unwrap_err();
	assert_eq!(err.kind(), ErrorKind::NotFound);
	assert_eq!(ws.workspace.tree().get(dir.id).await.unwrap().archive_type(), None);
}

#[tokio::test]
async fn moves_across_archive_boundaries() {
	let ws = TestWorkspace::new().await;
	let tree = ws.workspace.tree();

	let jar = tree.create_directory("lib.jar", None).await.unwrap();
	let zip = tree.create_directory("bundle.zip", None).await.unwrap();
	let nested = tree.create_directory("nested", Some(zip.id)).await.unwrap();
	let class = tree
		.create_file("A.class", Some(nested.id), b"\xca\xfe")
		.await
		.unwrap();
	ws.workspace.mark_as_archive_by_id(jar.id, "jar").await.unwrap();
	ws.workspace.mark_as_archive_by_id(zip.id, "zip").await.unwrap();

	// inside the zip only move support counts
	tree.move_to(class.id, Some(zip.id)).await.unwrap();
	// into the jar is an add there, and the jar takes files
	tree.move_to(class.id, Some(jar.id)).await.unwrap();
	// but not directories
	assert_eq!(
		tree.move_to(nested.id, Some(jar.id))
			.await
			.unwrap_err()
			.kind(),
		ErrorKind::PolicyViolation
	);

	assert_eq!(
		tree.resolve_path("lib.jar/A.class").await.unwrap().id,
		class.id
	);
	let rows = ws.rows().await;
	let class_row = rows
		.iter()
		.find(|row| row["name"] == "A.class")
		.unwrap();
	assert_eq!(
		class_row["parent_id"].as_i64(),
		ws.workspace.database_id(jar.id).await.map(i64::from)
	);
}

#[tokio::test]
async fn create_from_scratch_by_identifier() {
	let ws = TestWorkspace::new().await;
	let tree = ws.workspace.tree();

	let dir = tree.create_directory("classes", None).await.unwrap();
	tree.create_directory("com", Some(dir.id)).await.unwrap();

	// a jar cannot hold the existing subdirectory
	assert_eq!(
		ws.workspace
			.create_from_scratch_by_id(dir.id, "jar")
			.await
			.unwrap_err()
			.kind(),
		ErrorKind::PolicyViolation
	);
	let marked = ws
		.workspace
		.create_from_scratch_by_id(dir.id, "zip")
		.await
		.unwrap();
	assert_eq!(marked.archive_type(), Some("zip"));

	let rows = ws.rows().await;
	let row = rows.iter().find(|row| row["name"] == "classes").unwrap();
	assert!(row["archive_id"].as_i64().is_some());
	let child = rows.iter().find(|row| row["name"] == "com").unwrap();
	assert!(child["archive_id"].is_null());
}
