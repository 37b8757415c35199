use prosearch_core::StreamEvent;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::trace;

/// Events of one run, in emission order.
pub type EventStream = ReceiverStream<StreamEvent>;

/// Sending half of a run's event stream.
///
/// A dropped receiver is not an error: the run keeps going and later events are discarded.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::Sender<StreamEvent>,
}

impl EventSink {
    pub fn channel(capacity: usize) -> (Self, EventStream) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, ReceiverStream::new(rx))
    }

    pub async fn emit(&self, event: StreamEvent) {
        let kind = event.kind();
        if self.tx.send(event).await.is_err() {
            trace!(kind, "event receiver dropped; discarding");
        }
    }
}
