//! The single persistent channel to the server.
//!
//! Owns the connection state machine, the reconnect/backoff loop, the
//! outbound queue, and the inbound fan-out that every other component
//! consumes.

use std::sync::Arc;

use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::{watch, Mutex, RwLock};
use uuid::Uuid;

use crate::config::Config;
use event_schema::{ClientOp, ServerEvent};
use resilience::Backoff;

pub mod queue;
pub mod transport;

use queue::OutboundQueue;
pub use transport::{Transport, TransportLink, WsTransport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Everything the channel fans out to subscribers.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    StateChanged(ConnectionState),
    Server(ServerEvent),
    /// A queued send was failed locally instead of being replayed (it went
    /// stale while the channel was down).
    SendFailed { temp_id: Uuid },
}

/// Owner of the persistent channel.
///
/// One instance per client, constructed explicitly and handed to consumers;
/// there is no ambient global. `send` queues while the channel is down; the
/// run loop reconnects with jittered backoff until `disconnect` is called.
pub struct ConnectionManager {
    config: Arc<Config>,
    transport: Arc<dyn Transport>,
    state: RwLock<ConnectionState>,
    queue: Mutex<OutboundQueue>,
    link: RwLock<Option<UnboundedSender<String>>>,
    subscribers: RwLock<Vec<UnboundedSender<ChannelEvent>>>,
    cancel: Mutex<Option<watch::Sender<bool>>>,
}

impl ConnectionManager {
    pub fn new(config: Arc<Config>, transport: Arc<dyn Transport>) -> Self {
        Self {
            queue: Mutex::new(OutboundQueue::new(config.queue_staleness)),
            config,
            transport,
            state: RwLock::new(ConnectionState::Disconnected),
            link: RwLock::new(None),
            subscribers: RwLock::new(Vec::new()),
            cancel: Mutex::new(None),
        }
    }

    pub async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }

    /// Number of operations waiting for the channel (for debugging/metrics).
    pub async fn queued_ops(&self) -> usize {
        self.queue.lock().await.len()
    }

    /// Register a consumer of channel events. Dead receivers are cleaned up
    /// on the next broadcast.
    pub async fn subscribe(&self) -> UnboundedReceiver<ChannelEvent> {
        let (tx, rx) = unbounded_channel();
        self.subscribers.write().await.push(tx);
        rx
    }

    async fn broadcast(&self, event: ChannelEvent) {
        let mut guard = self.subscribers.write().await;
        guard.retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }

    async fn set_state(&self, next: ConnectionState) {
        {
            let mut guard = self.state.write().await;
            if *guard == next {
                return;
            }
            *guard = next;
        }
        tracing::info!(state = ?next, "connection state changed");
        self.broadcast(ChannelEvent::StateChanged(next)).await;
    }

    /// Start the connection task. No-op (with a warning) when one is already
    /// running.
    pub async fn connect(self: &Arc<Self>, token: impl Into<String>) {
        let mut slot = self.cancel.lock().await;
        if slot.as_ref().map(|tx| !tx.is_closed()).unwrap_or(false) {
            tracing::warn!("connect called while a connection task is active");
            return;
        }

        let (tx, rx) = watch::channel(false);
        *slot = Some(tx);

        let manager = Arc::clone(self);
        let token = token.into();
        tokio::spawn(async move {
            manager.run(token, rx).await;
        });
    }

    /// Stop reconnecting and drop the channel. Queued operations stay queued;
    /// their ack timeouts decide their fate.
    pub async fn disconnect(&self) {
        if let Some(tx) = self.cancel.lock().await.take() {
            let _ = tx.send(true);
        } else {
            self.set_state(ConnectionState::Disconnected).await;
        }
    }

    /// Submit an operation. Transmitted immediately when connected, queued in
    /// submission order otherwise. Failure to get an ack, not failure to
    /// enqueue, is what surfaces to callers.
    pub async fn send(&self, op: ClientOp) {
        if self.state().await == ConnectionState::Connected {
            match self.try_transmit(op).await {
                Ok(()) => return,
                Err(op) => {
                    // Link died under us; the run loop will notice.
                    self.queue.lock().await.push(op);
                    return;
                }
            }
        }
        self.queue.lock().await.push(op);
    }

    async fn try_transmit(&self, op: ClientOp) -> Result<(), ClientOp> {
        let frame = match serde_json::to_string(&op) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(error = %e, op = op.op_type(), "failed to serialize op");
                return Ok(());
            }
        };

        let guard = self.link.read().await;
        match guard.as_ref() {
            Some(sender) if sender.send(frame).is_ok() => Ok(()),
            _ => Err(op),
        }
    }

    /// Replay the queue after a (re)connect: fresh operations go out in
    /// submission order, stale sends are failed locally.
    async fn flush_queue(&self) {
        let (fresh, stale) = self.queue.lock().await.drain();

        for op in stale {
            match op.temp_id() {
                Some(temp_id) => {
                    tracing::warn!(%temp_id, "failing stale queued send locally");
                    self.broadcast(ChannelEvent::SendFailed { temp_id }).await;
                }
                None => {
                    tracing::debug!(op = op.op_type(), "dropping stale queued op");
                }
            }
        }

        for op in fresh {
            if let Err(op) = self.try_transmit(op).await {
                self.queue.lock().await.push(op);
                return;
            }
        }
    }

    async fn dispatch_frame(&self, frame: &str) {
        match serde_json::from_str::<ServerEvent>(frame) {
            Ok(event) => self.broadcast(ChannelEvent::Server(event)).await,
            Err(e) => {
                // Must never corrupt the ordering of well-formed events.
                tracing::warn!(error = %e, "dropping malformed inbound frame");
            }
        }
    }

    async fn run(self: Arc<Self>, token: String, mut cancel: watch::Receiver<bool>) {
        let mut backoff = Backoff::new(self.config.backoff_base, self.config.backoff_cap);
        let mut ever_connected = false;

        loop {
            if *cancel.borrow() {
                break;
            }

            self.set_state(if ever_connected {
                ConnectionState::Reconnecting
            } else {
                ConnectionState::Connecting
            })
            .await;

            match self.transport.open(&self.config.ws_url, &token).await {
                Ok(link) => {
                    ever_connected = true;
                    backoff.reset();
                    *self.link.write().await = Some(link.outbound);
                    self.set_state(ConnectionState::Connected).await;
                    self.flush_queue().await;

                    let mut inbound = link.inbound;
                    loop {
                        tokio::select! {
                            changed = cancel.changed() => {
                                if changed.is_err() || *cancel.borrow() {
                                    break;
                                }
                            }
                            frame = inbound.recv() => match frame {
                                Some(text) => self.dispatch_frame(&text).await,
                                None => {
                                    tracing::warn!("transport closed, scheduling reconnect");
                                    break;
                                }
                            }
                        }
                    }
                    *self.link.write().await = None;
                }
                Err(e) => {
                    tracing::warn!(error = %e, attempt = backoff.attempt(), "connect attempt failed");
                }
            }

            if *cancel.borrow() {
                break;
            }

            self.set_state(ConnectionState::Reconnecting).await;
            tokio::select! {
                _ = cancel.changed() => {}
                _ = backoff.sleep_next() => {}
            }
        }

        *self.link.write().await = None;
        self.set_state(ConnectionState::Disconnected).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use event_schema::MessageContent;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;
    use tokio::time::timeout;

    /// Transport handing out pre-scripted links; `open` fails once the
    /// script runs dry.
    struct MockTransport {
        links: StdMutex<VecDeque<TransportLink>>,
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn open(&self, _url: &str, _token: &str) -> crate::error::AppResult<TransportLink> {
            self.links
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| crate::error::AppError::Transport("no link scripted".into()))
        }
    }

    struct LinkHandles {
        /// Frames the client transmitted.
        sent: UnboundedReceiver<String>,
        /// Inject server pushes; dropping this closes the link.
        push: UnboundedSender<String>,
    }

    fn scripted_link() -> (TransportLink, LinkHandles) {
        let (out_tx, out_rx) = unbounded_channel();
        let (in_tx, in_rx) = unbounded_channel();
        (
            TransportLink {
                outbound: out_tx,
                inbound: in_rx,
            },
            LinkHandles {
                sent: out_rx,
                push: in_tx,
            },
        )
    }

    fn manager_with(
        links: Vec<TransportLink>,
        tweak: impl FnOnce(&mut Config),
    ) -> Arc<ConnectionManager> {
        let mut config = Config::default();
        config.backoff_base = Duration::from_millis(1);
        config.backoff_cap = Duration::from_millis(5);
        tweak(&mut config);

        let transport = Arc::new(MockTransport {
            links: StdMutex::new(links.into_iter().collect()),
        });
        Arc::new(ConnectionManager::new(Arc::new(config), transport))
    }

    fn send_op(conversation_id: Uuid, temp_id: Uuid) -> ClientOp {
        ClientOp::SendMessage {
            conversation_id,
            temp_id,
            content: MessageContent::text("hello"),
            formatting: Default::default(),
            attachments: vec![],
            reply_to: None,
        }
    }

    async fn wait_for_state(
        rx: &mut UnboundedReceiver<ChannelEvent>,
        wanted: ConnectionState,
    ) {
        loop {
            let event = timeout(Duration::from_secs(2), rx.recv())
                .await
                .expect("timed out waiting for state")
                .expect("event bus closed");
            if matches!(event, ChannelEvent::StateChanged(state) if state == wanted) {
                return;
            }
        }
    }

    #[tokio::test]
    async fn test_send_queues_while_disconnected() {
        let manager = manager_with(vec![], |_| {});
        manager
            .send(send_op(Uuid::new_v4(), Uuid::new_v4()))
            .await;

        assert_eq!(manager.state().await, ConnectionState::Disconnected);
        assert_eq!(manager.queued_ops().await, 1);
    }

    #[tokio::test]
    async fn test_connect_flushes_queue_in_order() {
        let (link, mut handles) = scripted_link();
        let manager = manager_with(vec![link], |_| {});

        let conversation_id = Uuid::new_v4();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        manager.send(send_op(conversation_id, first)).await;
        manager.send(send_op(conversation_id, second)).await;

        let mut events = manager.subscribe().await;
        manager.connect("token").await;
        wait_for_state(&mut events, ConnectionState::Connected).await;

        let frame = timeout(Duration::from_secs(2), handles.sent.recv())
            .await
            .unwrap()
            .unwrap();
        let op: ClientOp = serde_json::from_str(&frame).unwrap();
        assert_eq!(op.temp_id(), Some(first));

        let frame = timeout(Duration::from_secs(2), handles.sent.recv())
            .await
            .unwrap()
            .unwrap();
        let op: ClientOp = serde_json::from_str(&frame).unwrap();
        assert_eq!(op.temp_id(), Some(second));

        assert_eq!(manager.queued_ops().await, 0);
    }

    #[tokio::test]
    async fn test_stale_queued_sends_fail_locally() {
        let (link, mut handles) = scripted_link();
        let manager = manager_with(vec![link], |config| {
            config.queue_staleness = Duration::ZERO;
        });

        let temp_id = Uuid::new_v4();
        manager.send(send_op(Uuid::new_v4(), temp_id)).await;

        let mut events = manager.subscribe().await;
        manager.connect("token").await;

        let failed = loop {
            let event = timeout(Duration::from_secs(2), events.recv())
                .await
                .unwrap()
                .unwrap();
            if let ChannelEvent::SendFailed { temp_id } = event {
                break temp_id;
            }
        };
        assert_eq!(failed, temp_id);

        // Nothing was replayed onto the wire.
        assert!(handles.sent.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_malformed_frames_are_dropped() {
        let (link, handles) = scripted_link();
        let manager = manager_with(vec![link], |_| {});

        let mut events = manager.subscribe().await;
        manager.connect("token").await;
        wait_for_state(&mut events, ConnectionState::Connected).await;

        handles.push.send("not json at all".into()).unwrap();
        let valid = serde_json::to_string(&ServerEvent::TypingStop {
            conversation_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
        })
        .unwrap();
        handles.push.send(valid).unwrap();

        // The next event through is the valid one; the garbage vanished.
        let event = loop {
            match timeout(Duration::from_secs(2), events.recv())
                .await
                .unwrap()
                .unwrap()
            {
                ChannelEvent::Server(event) => break event,
                _ => continue,
            }
        };
        assert_eq!(event.event_type(), "typing.stop");
        assert_eq!(manager.state().await, ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_transport_drop_triggers_reconnect() {
        let (first_link, first_handles) = scripted_link();
        let (second_link, _second_handles) = scripted_link();
        let manager = manager_with(vec![first_link, second_link], |_| {});

        let mut events = manager.subscribe().await;
        manager.connect("token").await;
        wait_for_state(&mut events, ConnectionState::Connected).await;

        // Server side goes away.
        drop(first_handles.push);

        wait_for_state(&mut events, ConnectionState::Reconnecting).await;
        wait_for_state(&mut events, ConnectionState::Connected).await;
    }

    #[tokio::test]
    async fn test_disconnect_is_terminal_until_reconnect() {
        let (link, _handles) = scripted_link();
        let manager = manager_with(vec![link], |_| {});

        let mut events = manager.subscribe().await;
        manager.connect("token").await;
        wait_for_state(&mut events, ConnectionState::Connected).await;

        manager.disconnect().await;
        wait_for_state(&mut events, ConnectionState::Disconnected).await;
        assert_eq!(manager.state().await, ConnectionState::Disconnected);
    }
}
