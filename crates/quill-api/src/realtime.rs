//! In-process fan-out of accepted changes to connected devices

use std::convert::Infallible;
use std::sync::Arc;

use axum::response::sse::Event;
use futures::stream::{self, Stream};
use quill_core::models::SyncChange;
use quill_core::sync::ChangeNotifier;
use tokio::sync::broadcast::{self, error::RecvError};

#[derive(Debug)]
pub struct ChangeMessage {
    pub user_id: String,
    pub change: SyncChange,
}

/// [`ChangeNotifier`] backed by a broadcast channel. Messages sent while
/// nobody listens are dropped.
#[derive(Clone)]
pub struct BroadcastNotifier {
    sender: broadcast::Sender<Arc<ChangeMessage>>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<ChangeMessage>> {
        self.sender.subscribe()
    }
}

impl ChangeNotifier for BroadcastNotifier {
    fn notify(&self, user_id: &str, change: &SyncChange) {
        let message = ChangeMessage {
            user_id: user_id.to_string(),
            change: change.clone(),
        };
        self.sender.send(Arc::new(message)).ok();
    }
}

/// SSE events for one account, skipping changes made by `device_id`
pub fn change_stream(
    receiver: broadcast::Receiver<Arc<ChangeMessage>>,
    user_id: String,
    device_id: String,
) -> impl Stream<Item = Result<Event, Infallible>> {
    stream::unfold(
        (receiver, user_id, device_id),
        |(mut receiver, user_id, device_id)| async move {
            loop {
                match receiver.recv().await {
                    Ok(message) => {
                        if message.user_id != user_id || message.change.device_id == device_id {
                            continue;
                        }
                        match Event::default().event("change").json_data(&message.change) {
                            Ok(event) => return Some((Ok(event), (receiver, user_id, device_id))),
                            Err(error) => {
                                tracing::warn!("Failed to encode change event: {}", error);
                            }
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Realtime subscriber lagged, dropping changes");
                    }
                    Err(RecvError::Closed) => return None,
                }
            }
        },
    )
}
