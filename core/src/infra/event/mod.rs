//! Ordered event channel for decoupled communication
//!
//! Publishers hand events to an unbounded queue and return immediately. One
//! sequencer task per channel pops the queue and awaits every observer in turn,
//! so each observer sees events in exactly the order they were published, off
//! the publisher's call stack. Subscription changes travel through the same
//! queue and take effect between two events.

use std::{
	collections::HashMap,
	fmt,
	panic::AssertUnwindSafe,
	sync::{Arc, Mutex},
};

use async_channel as chan;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::{sync::oneshot, task::JoinHandle};
use tracing::{debug, error, trace, warn};
use uuid::Uuid;

use crate::{
	tree::{FileEntity, FileId},
	view::{GeneratorType, ViewEntity},
};

/// Committed workspace mutations, in the order the tree applied them
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, strum::AsRefStr)]
pub enum Event {
	FileCreated {
		file: FileEntity,
	},
	/// Content or format tag changed
	FileUpdated {
		file: FileEntity,
	},
	FileRenamed {
		file: FileId,
		old_name: String,
		new_name: String,
	},
	FileMoved {
		file: FileId,
		old_parent: Option<FileId>,
		new_parent: Option<FileId>,
	},
	FileDeleted {
		file: FileId,
	},
	ViewCreated {
		view: ViewEntity,
	},
	ViewDeleted {
		file: FileId,
		generator: GeneratorType,
	},
	ArchiveCreated {
		directory: FileId,
		archive_type: String,
	},
}

impl Event {
	pub fn variant_name(&self) -> &str {
		self.as_ref()
	}

	/// The node this event is about
	pub fn file_id(&self) -> FileId {
		match self {
			Self::FileCreated { file } | Self::FileUpdated { file } => file.id,
			Self::FileRenamed { file, .. }
			| Self::FileMoved { file, .. }
			| Self::FileDeleted { file }
			| Self::ViewDeleted { file, .. } => *file,
			Self::ViewCreated { view } => view.file,
			Self::ArchiveCreated { directory, .. } => *directory,
		}
	}
}

/// Receives every event published on a channel it is subscribed to
#[async_trait::async_trait]
pub trait EventObserver: Send + Sync + 'static {
	async fn on_event(&self, event: &Event);

	fn name(&self) -> &str {
		"observer"
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(Uuid);

impl ObserverId {
	fn new() -> Self {
		Self(Uuid::new_v4())
	}
}

impl fmt::Display for ObserverId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		self.0.fmt(f)
	}
}

type Observers = Vec<(ObserverId, Arc<dyn EventObserver>)>;

enum Command {
	Publish(Event),
	Subscribe(ObserverId, Arc<dyn EventObserver>),
	Unsubscribe(ObserverId, oneshot::Sender<bool>),
	Flush(oneshot::Sender<()>),
	Drain(oneshot::Sender<Observers>),
}

struct Inner {
	tx: chan::Sender<Command>,
	sequencer: Mutex<Option<JoinHandle<()>>>,
}

/// Cheaply cloneable handle on one sequencer
#[derive(Clone)]
pub struct EventChannel {
	inner: Arc<Inner>,
}

impl EventChannel {
	/// Start a new channel; must be called within a tokio runtime
	pub fn spawn() -> Self {
		let (tx, rx) = chan::unbounded();
		let sequencer = tokio::spawn(Sequencer {
			rx,
			observers: Vec::new(),
		}
		.run());

		Self {
			inner: Arc::new(Inner {
				tx,
				sequencer: Mutex::new(Some(sequencer)),
			}),
		}
	}

	/// Queue an event for delivery, never blocks
	pub fn publish(&self, event: Event) {
		trace!(event = event.variant_name(), file = %event.file_id(), "Publishing event");
		if let Err(chan::TrySendError::Closed(Command::Publish(event))) =
			self.inner.tx.try_send(Command::Publish(event))
		{
			warn!(
				event = event.variant_name(),
				"Dropping event published on a closed channel"
			);
		}
	}

	/// Start delivering events published from now on to `observer`
	pub fn subscribe(&self, observer: Arc<dyn EventObserver>) -> ObserverId {
		let id = ObserverId::new();
		self.subscribe_with_id(id, observer);
		id
	}

	fn subscribe_with_id(&self, id: ObserverId, observer: Arc<dyn EventObserver>) {
		debug!(observer = observer.name(), %id, "Subscribing observer");
		if self
			.inner
			.tx
			.try_send(Command::Subscribe(id, observer))
			.is_err()
		{
			warn!(%id, "Subscribing to a closed channel");
		}
	}

	/// Returns whether the observer was subscribed
	pub async fn unsubscribe(&self, id: ObserverId) -> bool {
		let (ack_tx, ack_rx) = oneshot::channel();
		if self
			.inner
			.tx
			.try_send(Command::Unsubscribe(id, ack_tx))
			.is_err()
		{
			return false;
		}
		ack_rx.await.unwrap_or(false)
	}

	/// Wait until every event published before this call has been delivered
	pub async fn flush(&self) {
		let (ack_tx, ack_rx) = oneshot::channel();
		if self.inner.tx.try_send(Command::Flush(ack_tx)).is_ok() {
			let _ = ack_rx.await;
		}
	}

	/// Move every observer onto `target`, keeping their ids. Observers listed
	/// in `replacements` are swapped for the given instance on the way.
	///
	/// Events already queued here are delivered before the move; this channel
	/// has no observers afterwards.
	pub async fn migrate_to(
		&self,
		target: &EventChannel,
		mut replacements: HashMap<ObserverId, Arc<dyn EventObserver>>,
	) -> usize {
		let (ack_tx, ack_rx) = oneshot::channel();
		if self.inner.tx.try_send(Command::Drain(ack_tx)).is_err() {
			warn!("Migrating observers off a closed channel");
			return 0;
		}
		let observers = ack_rx.await.unwrap_or_default();
		let count = observers.len();

		for (id, observer) in observers {
			let observer = replacements.remove(&id).unwrap_or(observer);
			target.subscribe_with_id(id, observer);
		}

		for id in replacements.keys() {
			warn!(%id, "Replacement given for an observer that was not subscribed");
		}

		debug!(count, "Migrated observers to replacement channel");
		count
	}

	/// Deliver whatever is still queued, then stop the sequencer
	pub async fn shutdown(&self) {
		self.inner.tx.close();

		let handle = self
			.inner
			.sequencer
			.lock()
			.unwrap_or_else(|poisoned| poisoned.into_inner())
			.take();
		if let Some(handle) = handle {
			if let Err(e) = handle.await {
				error!(?e, "Event sequencer task failed");
			}
		}
	}

	pub fn is_closed(&self) -> bool {
		self.inner.tx.is_closed()
	}
}

struct Sequencer {
	rx: chan::Receiver<Command>,
	observers: Observers,
}

impl Sequencer {
	async fn run(mut self) {
		while let Ok(command) = self.rx.recv().await {
			match command {
				Command::Publish(event) => self.deliver(&event).await,
				Command::Subscribe(id, observer) => self.observers.push((id, observer)),
				Command::Unsubscribe(id, ack) => {
					let before = self.observers.len();
					self.observers.retain(|(observer_id, _)| *observer_id != id);
					let _ = ack.send(self.observers.len() != before);
				}
				Command::Flush(ack) => {
					let _ = ack.send(());
				}
				Command::Drain(ack) => {
					let _ = ack.send(std::mem::take(&mut self.observers));
				}
			}
		}

		debug!("Event sequencer stopped");
	}

	async fn deliver(&self, event: &Event) {
		for (id, observer) in &self.observers {
			if AssertUnwindSafe(observer.on_event(event))
				.catch_unwind()
				.await
				.is_err()
			{
				error!(
					observer = observer.name(),
					%id,
					event = event.variant_name(),
					"Observer panicked while handling event"
				);
			}
		}
	}
}
