//! The consumer side of a streaming run.

use futures::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use toolflow_core::event::{EventClock, FlowEvent};
use toolflow_core::message::ConversationId;
use tracing::warn;

/// Events of one run, in emission order.
///
/// Ends after the terminal event (`final` or `error`), or immediately once
/// cancelled. Events still queued at cancellation are discarded. Dropping
/// the stream cancels the run.
#[derive(Debug)]
pub struct EventStream {
    rx: mpsc::Receiver<FlowEvent>,
    cancel: CancellationToken,
    clock: EventClock,
    conversation_id: ConversationId,
    finished: bool,
}

impl EventStream {
    pub(crate) fn new(
        rx: mpsc::Receiver<FlowEvent>,
        cancel: CancellationToken,
        conversation_id: ConversationId,
    ) -> Self {
        Self {
            rx,
            cancel,
            clock: EventClock::new(),
            conversation_id,
            finished: false,
        }
    }

    /// Stop the run. The run halts at its next suspension point and emits
    /// nothing further.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Token that cancels this run; hand it to whatever else should be able to stop it.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn conversation_id(&self) -> &ConversationId {
        &self.conversation_id
    }
}

impl Stream for EventStream {
    type Item = FlowEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<FlowEvent>> {
        if self.finished || self.cancel.is_cancelled() {
            return Poll::Ready(None);
        }

        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(event)) => {
                if event.is_terminal() {
                    self.finished = true;
                }
                Poll::Ready(Some(event))
            }
            Poll::Ready(None) => {
                self.finished = true;
                if self.cancel.is_cancelled() {
                    return Poll::Ready(None);
                }
                // The run task died without reporting; don't leave consumers hanging.
                warn!(conversation_id = %self.conversation_id, "Run ended without a terminal event");
                let event = FlowEvent::error(&self.clock, "run ended without a terminal event", None);
                Poll::Ready(Some(event))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
