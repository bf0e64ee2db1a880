use std::collections::HashMap;
use std::sync::Arc;

use parley_core::{InboundEvent, OutboundEvent};
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinError, JoinSet};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::ConversationEngine;

/// Queue feeding one conversation worker.
struct Lane {
    queue: mpsc::UnboundedSender<InboundEvent>,
    /// Resolves once the worker has exited.
    finished: oneshot::Receiver<()>,
}

impl ConversationEngine {
    /// Multiplex inbound events over per-conversation workers.
    ///
    /// Each conversation id gets its own task fed by a queue, so events of
    /// one conversation are handled strictly in arrival order while
    /// different conversations interleave freely. A worker retires once its
    /// conversation has left the store, and a later event for the same id
    /// starts a new worker after the old one has drained. Returns once
    /// `inbound` is closed and every queued event has been handled.
    pub async fn serve(
        self: Arc<Self>,
        mut inbound: mpsc::Receiver<InboundEvent>,
        outbound: mpsc::Sender<OutboundEvent>,
    ) {
        let mut lanes: HashMap<String, Lane> = HashMap::new();
        let mut workers: JoinSet<String> = JoinSet::new();

        loop {
            tokio::select! {
                event = inbound.recv() => {
                    let Some(event) = event else { break };
                    self.dispatch(event, &mut lanes, &mut workers, &outbound);
                }
                Some(joined) = workers.join_next(), if !workers.is_empty() => {
                    reap(&mut lanes, joined);
                }
            }
        }

        info!("Inbound channel closed, draining {} worker(s)", workers.len());
        drop(lanes);
        while let Some(joined) = workers.join_next().await {
            if let Err(err) = joined {
                error!("Conversation worker failed: {err}");
            }
        }
    }

    fn dispatch(
        self: &Arc<Self>,
        event: InboundEvent,
        lanes: &mut HashMap<String, Lane>,
        workers: &mut JoinSet<String>,
        outbound: &mpsc::Sender<OutboundEvent>,
    ) {
        let id = event.conversation_id.clone();
        let (event, previous) = match lanes.remove(&id) {
            Some(lane) => match lane.queue.send(event) {
                Ok(()) => {
                    lanes.insert(id, lane);
                    return;
                }
                Err(mpsc::error::SendError(event)) => (event, Some(lane.finished)),
            },
            None => (event, None),
        };

        debug!(conversation = %id, "Starting conversation worker");
        let (queue, rx) = mpsc::unbounded_channel();
        if queue.send(event).is_err() {
            return;
        }
        let (done, finished) = oneshot::channel();
        lanes.insert(id.clone(), Lane { queue, finished });
        workers.spawn(Arc::clone(self).run_worker(id, rx, outbound.clone(), previous, done));
    }

    /// Handle queued events until the queue closes or the conversation is
    /// evicted. Returns the conversation id.
    async fn run_worker(
        self: Arc<Self>,
        conversation_id: String,
        mut rx: mpsc::UnboundedReceiver<InboundEvent>,
        outbound: mpsc::Sender<OutboundEvent>,
        previous: Option<oneshot::Receiver<()>>,
        _done: oneshot::Sender<()>,
    ) -> String {
        // A retiring worker for the same id may still be draining.
        if let Some(previous) = previous {
            let _ = previous.await;
        }

        let idle = self.config().worker_idle_timeout;
        loop {
            match timeout(idle, rx.recv()).await {
                Ok(Some(event)) => {
                    if !self.deliver(&conversation_id, event, &outbound).await {
                        return conversation_id;
                    }
                    if self.store().get(&conversation_id).is_none() {
                        break;
                    }
                }
                Ok(None) => {
                    debug!(conversation = %conversation_id, "Conversation worker stopped");
                    return conversation_id;
                }
                Err(_) if self.store().get(&conversation_id).is_none() => break,
                Err(_) => {}
            }
        }

        // Refuse further events, then finish the ones already queued.
        rx.close();
        while let Ok(event) = rx.try_recv() {
            if !self.deliver(&conversation_id, event, &outbound).await {
                break;
            }
        }
        debug!(conversation = %conversation_id, "Conversation worker retired");
        conversation_id
    }

    async fn deliver(
        &self,
        conversation_id: &str,
        event: InboundEvent,
        outbound: &mpsc::Sender<OutboundEvent>,
    ) -> bool {
        for reply in self.handle(event).await {
            if outbound.send(reply).await.is_err() {
                warn!(conversation = %conversation_id, "Outbound channel closed");
                return false;
            }
        }
        true
    }
}

/// Forget the lane of a finished worker unless a newer worker owns it.
fn reap(lanes: &mut HashMap<String, Lane>, joined: Result<String, JoinError>) {
    match joined {
        Ok(id) => {
            if lanes.get(&id).is_some_and(|lane| lane.queue.is_closed()) {
                lanes.remove(&id);
                debug!(conversation = %id, "Reaped conversation worker");
            }
        }
        Err(err) => error!("Conversation worker failed: {err}"),
    }
}
