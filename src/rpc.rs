//! RPC engine
//!
//! Owns the transport exclusively. After the hello exchange a single driver
//! task writes queued requests in submission order and demultiplexes replies
//! by `message-id`, so any number of callers can have RPCs in flight on one
//! session (pipelining) and replies may arrive in any order.
//!
//! Dropping a pending [`RpcEngine::call`] future removes its correlation entry
//! but cannot recall a request that was already written; the device may still
//! apply it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::SessionConfig;
use crate::error::{NetconfError, Result};
use crate::events::{EventHook, SessionEvent, emit};
use crate::hello::{BaseVersion, Capabilities, ServerHello, client_hello, negotiate};
use crate::messages::{RpcReply, RpcRequest, message_id_of};
use crate::node::ConfigNode;
use crate::transport::Transport;
use crate::xml;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    HelloSent,
    HelloReceived,
    Ready,
    Closed,
}

type ReplySender = oneshot::Sender<Result<RpcReply>>;

/// State shared between callers and the driver task
struct Shared {
    pending: DashMap<u64, ReplySender>,
    next_id: AtomicU64,
    closed: AtomicBool,
    state: watch::Sender<EngineState>,
    hook: Option<EventHook>,
}

impl Shared {
    fn dispatch(&self, message: &str) {
        trace!(xml = %message, "rpc in");
        let root = match xml::decode(message) {
            Ok(root) => root,
            Err(e) => {
                warn!(error = %e, "dropping undecodable message");
                return;
            }
        };
        if root.local_name() != "rpc-reply" {
            debug!(element = root.name(), "ignoring non-reply message");
            return;
        }
        let message_id = match message_id_of(&root) {
            Ok(id) => id,
            Err(e) => {
                warn!(error = %e, "dropping uncorrelatable reply");
                return;
            }
        };

        match self.pending.remove(&message_id) {
            Some((_, sender)) => {
                debug!(message_id, "reply received");
                emit(self.hook.as_ref(), SessionEvent::ReplyReceived { message_id });
                let _ = sender.send(RpcReply::from_node(&root));
            }
            None => {
                warn!(message_id, "reply for unknown message-id");
                emit(self.hook.as_ref(), SessionEvent::UnmatchedReply { message_id });
            }
        }
    }

    /// Terminal transition: every outstanding call fails with `TransportClosed`
    fn shut(&self, reason: Option<String>) {
        self.closed.store(true, Ordering::SeqCst);

        let outstanding: Vec<u64> = self.pending.iter().map(|entry| *entry.key()).collect();
        for message_id in outstanding {
            if let Some((_, sender)) = self.pending.remove(&message_id) {
                let _ = sender.send(Err(NetconfError::TransportClosed));
            }
        }

        self.state.send_replace(EngineState::Closed);
        match &reason {
            Some(reason) => warn!(%reason, "session closed"),
            None => info!("session closed"),
        }
        emit(self.hook.as_ref(), SessionEvent::Closed { reason });
    }
}

/// Removes the correlation entry when a call finishes, times out or is dropped
struct PendingGuard<'a> {
    shared: &'a Shared,
    message_id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.shared.pending.remove(&self.message_id);
    }
}

struct Outbound {
    message_id: u64,
    xml: String,
}

/// Handle to a running engine; clones share the same session
#[derive(Clone)]
pub struct RpcEngine {
    shared: Arc<Shared>,
    /// Id allocation and enqueueing share this lock so wire order follows id order
    outbound: Arc<Mutex<mpsc::UnboundedSender<Outbound>>>,
    shutdown: CancellationToken,
    driver: Arc<Mutex<Option<JoinHandle<()>>>>,
    version: BaseVersion,
    timeout: Duration,
}

impl RpcEngine {
    /// Exchange hellos over `transport` and start the driver task.
    ///
    /// Any failure before the engine is ready closes the transport and is
    /// reported as a connection error.
    pub async fn start(
        mut transport: Box<dyn Transport>,
        config: &SessionConfig,
        hook: Option<EventHook>,
    ) -> Result<(Self, ServerHello)> {
        let (state, _) = watch::channel(EngineState::Idle);

        let (server, version) = match handshake(&mut transport, config, &state, hook.as_ref()).await {
            Ok(negotiated) => negotiated,
            Err(e) => {
                let _ = transport.close().await;
                return Err(e);
            }
        };

        let shared = Arc::new(Shared {
            pending: DashMap::new(),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            state,
            hook,
        });
        let (outbound, queue) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        shared.state.send_replace(EngineState::Ready);
        let driver = tokio::spawn(drive(transport, queue, shared.clone(), shutdown.clone()));

        let engine = Self {
            shared,
            outbound: Arc::new(Mutex::new(outbound)),
            shutdown,
            driver: Arc::new(Mutex::new(Some(driver))),
            version,
            timeout: config.rpc_timeout(),
        };
        Ok((engine, server))
    }

    /// Issue an RPC and wait for its reply using the configured timeout
    pub async fn call(&self, operation: ConfigNode) -> Result<RpcReply> {
        self.call_with_timeout(operation, self.timeout).await
    }

    /// Issue an RPC and wait for its reply for at most `timeout`
    pub async fn call_with_timeout(&self, operation: ConfigNode, timeout: Duration) -> Result<RpcReply> {
        if self.is_closed() {
            return Err(NetconfError::TransportClosed);
        }

        let (message_id, receiver) = self.enqueue(operation)?;
        let _pending = PendingGuard {
            shared: &self.shared,
            message_id,
        };

        match tokio::time::timeout(timeout, receiver).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => Err(NetconfError::TransportClosed),
            Err(_) => {
                warn!(message_id, ?timeout, "rpc timed out");
                emit(
                    self.shared.hook.as_ref(),
                    SessionEvent::RequestTimedOut { message_id },
                );
                Err(NetconfError::RpcTimeout { message_id, timeout })
            }
        }
    }

    /// Assign the next message-id, register the reply slot and queue the request
    fn enqueue(&self, operation: ConfigNode) -> Result<(u64, oneshot::Receiver<Result<RpcReply>>)> {
        let queue = self.outbound.lock();
        let message_id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let xml = RpcRequest::new(message_id, operation).to_xml()?;

        let (sender, receiver) = oneshot::channel();
        self.shared.pending.insert(message_id, sender);

        // Re-check after inserting so a concurrent shutdown cannot strand the entry
        if self.is_closed() || queue.send(Outbound { message_id, xml }).is_err() {
            self.shared.pending.remove(&message_id);
            return Err(NetconfError::TransportClosed);
        }
        Ok((message_id, receiver))
    }

    /// Current engine state
    pub fn state(&self) -> EngineState {
        *self.shared.state.borrow()
    }

    /// Watch state transitions (e.g. to notice the device hanging up)
    pub fn subscribe(&self) -> watch::Receiver<EngineState> {
        self.shared.state.subscribe()
    }

    /// True once the engine stopped accepting calls
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Base protocol version negotiated in the hello exchange
    pub fn base_version(&self) -> BaseVersion {
        self.version
    }

    /// Number of calls currently awaiting a reply
    pub fn pending_count(&self) -> usize {
        self.shared.pending.len()
    }

    /// Stop the driver and close the transport; outstanding calls fail
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let driver = self.driver.lock().take();
        if let Some(driver) = driver {
            if let Err(e) = driver.await {
                warn!(error = %e, "rpc driver task failed");
            }
        }
    }
}

async fn handshake(
    transport: &mut Box<dyn Transport>,
    config: &SessionConfig,
    state: &watch::Sender<EngineState>,
    hook: Option<&EventHook>,
) -> Result<(ServerHello, BaseVersion)> {
    let client_caps = Capabilities::new(config.capabilities.iter().cloned());
    let hello = client_hello(&client_caps)?;

    transport
        .send(&hello)
        .await
        .map_err(|e| NetconfError::Connection(format!("sending hello: {}", e)))?;
    state.send_replace(EngineState::HelloSent);
    emit(hook, SessionEvent::HelloSent);
    debug!(capabilities = client_caps.len(), "hello sent");

    let message = tokio::time::timeout(config.hello_timeout(), transport.receive())
        .await
        .map_err(|_| NetconfError::Connection("timed out waiting for server hello".into()))?
        .map_err(|e| NetconfError::Connection(format!("waiting for server hello: {}", e)))?;
    let server = ServerHello::parse(&message)?;

    state.send_replace(EngineState::HelloReceived);
    emit(
        hook,
        SessionEvent::HelloReceived {
            session_id: server.session_id,
            capabilities: server.capabilities.len(),
        },
    );
    info!(
        session_id = ?server.session_id,
        capabilities = server.capabilities.len(),
        "hello received"
    );

    let version = negotiate(&client_caps, &server.capabilities)?;
    if version == BaseVersion::V1_1 {
        transport.upgrade();
    }
    Ok((server, version))
}

async fn drive(
    mut transport: Box<dyn Transport>,
    mut queue: mpsc::UnboundedReceiver<Outbound>,
    shared: Arc<Shared>,
    shutdown: CancellationToken,
) {
    let reason = loop {
        tokio::select! {
            _ = shutdown.cancelled() => break None,
            request = queue.recv() => match request {
                Some(request) => {
                    trace!(message_id = request.message_id, xml = %request.xml, "rpc out");
                    if let Err(e) = transport.send(&request.xml).await {
                        break Some(e.to_string());
                    }
                    debug!(message_id = request.message_id, "request sent");
                    emit(
                        shared.hook.as_ref(),
                        SessionEvent::RequestSent { message_id: request.message_id },
                    );
                }
                // Every engine handle is gone
                None => break None,
            },
            message = transport.receive() => match message {
                Ok(message) => shared.dispatch(&message),
                Err(e) => break Some(e.to_string()),
            },
        }
    };

    shared.shut(reason);
    if let Err(e) = transport.close().await {
        debug!(error = %e, "error closing transport");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::ReplyBody;
    use crate::transport::FramedTransport;
    use tokio::io::DuplexStream;

    const HELLO_1_0: &str = r#"<hello xmlns="urn:ietf:params:xml:ns:netconf:base:1.0"><capabilities><capability>urn:ietf:params:netconf:base:1.0</capability></capabilities><session-id>1</session-id></hello>"#;
    const HELLO_1_1: &str = r#"<hello xmlns="urn:ietf:params:xml:ns:netconf:base:1.0"><capabilities><capability>urn:ietf:params:netconf:base:1.1</capability></capabilities><session-id>2</session-id></hello>"#;

    type Device = FramedTransport<DuplexStream>;

    async fn start_pair(config: SessionConfig, server_hello: &str, hook: Option<EventHook>) -> (RpcEngine, Device) {
        let (a, b) = tokio::io::duplex(64 * 1024);
        let mut device = FramedTransport::new(b, 1 << 20);
        let client = FramedTransport::new(a, 1 << 20);

        let (started, ()) = tokio::join!(RpcEngine::start(Box::new(client), &config, hook), async {
            device.receive().await.unwrap();
            device.send(server_hello).await.unwrap();
        });
        let (engine, _) = started.unwrap();
        if engine.base_version() == BaseVersion::V1_1 {
            device.upgrade();
        }
        (engine, device)
    }

    /// Read one request; returns its message-id and operation element
    async fn next_request(device: &mut Device) -> (u64, ConfigNode) {
        let message = device.receive().await.unwrap();
        let rpc = xml::decode(&message).unwrap();
        assert_eq!(rpc.name(), "rpc");
        let id = rpc.attribute("message-id").unwrap().parse().unwrap();
        (id, rpc.children()[0].clone())
    }

    fn ok_reply(id: u64) -> String {
        format!(r#"<rpc-reply message-id="{}" xmlns="urn:ietf:params:xml:ns:netconf:base:1.0"><ok/></rpc-reply>"#, id)
    }

    fn recorder() -> (EventHook, Arc<Mutex<Vec<SessionEvent>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let hook: EventHook = Arc::new(move |event: &SessionEvent| sink.lock().push(event.clone()));
        (hook, events)
    }

    #[tokio::test]
    async fn test_message_ids_increase() {
        let (engine, mut device) = start_pair(SessionConfig::default(), HELLO_1_0, None).await;
        assert_eq!(engine.state(), EngineState::Ready);

        for expected in 1..=3u64 {
            let call = engine.call(ConfigNode::empty("get"));
            let device_side = async {
                let (id, op) = next_request(&mut device).await;
                assert_eq!(id, expected);
                assert_eq!(op.name(), "get");
                device.send(&ok_reply(id)).await.unwrap();
            };
            let (reply, ()) = tokio::join!(call, device_side);
            assert_eq!(reply.unwrap().message_id, expected);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_calls_reach_wire_in_id_order() {
        let (engine, mut device) = start_pair(SessionConfig::default(), HELLO_1_0, None).await;

        let calls: Vec<_> = (0..32)
            .map(|_| {
                let engine = engine.clone();
                tokio::spawn(async move { engine.call(ConfigNode::empty("get")).await })
            })
            .collect();

        let mut ids = Vec::new();
        for _ in 0..32 {
            let (id, _) = next_request(&mut device).await;
            ids.push(id);
        }
        assert_eq!(ids, (1..=32).collect::<Vec<u64>>());

        for id in ids {
            device.send(&ok_reply(id)).await.unwrap();
        }
        for call in calls {
            assert!(call.await.unwrap().unwrap().is_ok());
        }
    }

    #[tokio::test]
    async fn test_replies_correlated_out_of_order() {
        let (engine, mut device) = start_pair(SessionConfig::default(), HELLO_1_0, None).await;

        let calls: Vec<_> = (0..3)
            .map(|i| {
                let engine = engine.clone();
                tokio::spawn(async move {
                    let reply = engine.call(ConfigNode::leaf("echo", i.to_string())).await?;
                    Ok::<_, NetconfError>((i, reply))
                })
            })
            .collect();

        let mut received = Vec::new();
        for _ in 0..3 {
            received.push(next_request(&mut device).await);
        }
        for (id, op) in received.iter().rev() {
            let reply = format!(
                r#"<rpc-reply message-id="{}"><data><echo>{}</echo></data></rpc-reply>"#,
                id,
                op.value().unwrap()
            );
            device.send(&reply).await.unwrap();
        }

        for call in calls {
            let (i, reply) = call.await.unwrap().unwrap();
            let ReplyBody::Data(data) = reply.body else {
                panic!("expected data reply");
            };
            assert_eq!(data.child_value("echo"), Some(i.to_string().as_str()));
        }
        assert_eq!(engine.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_leaves_no_pending_entry() {
        let (hook, events) = recorder();
        let (engine, mut device) = start_pair(SessionConfig::default(), HELLO_1_0, Some(hook)).await;

        let result = engine
            .call_with_timeout(ConfigNode::empty("get"), Duration::from_secs(2))
            .await;
        assert!(matches!(
            result,
            Err(NetconfError::RpcTimeout { message_id: 1, .. })
        ));
        assert_eq!(engine.pending_count(), 0);

        // A late reply is reported as unmatched, not delivered
        let (id, _) = next_request(&mut device).await;
        device.send(&ok_reply(id)).await.unwrap();
        let call = engine.call(ConfigNode::empty("get"));
        let device_side = async {
            let (id, _) = next_request(&mut device).await;
            device.send(&ok_reply(id)).await.unwrap();
        };
        let (reply, ()) = tokio::join!(call, device_side);
        assert_eq!(reply.unwrap().message_id, 2);

        let events = events.lock();
        assert!(events.contains(&SessionEvent::RequestTimedOut { message_id: 1 }));
        assert!(events.contains(&SessionEvent::UnmatchedReply { message_id: 1 }));
    }

    #[tokio::test]
    async fn test_cancelled_call_removes_entry() {
        let (engine, mut device) = start_pair(SessionConfig::default(), HELLO_1_0, None).await;

        let pending = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.call(ConfigNode::empty("get")).await })
        };
        next_request(&mut device).await;
        assert_eq!(engine.pending_count(), 1);

        pending.abort();
        assert!(pending.await.unwrap_err().is_cancelled());
        assert_eq!(engine.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_transport_closure_fails_all_pending() {
        let (hook, events) = recorder();
        let (engine, mut device) = start_pair(SessionConfig::default(), HELLO_1_0, Some(hook)).await;
        let mut state = engine.subscribe();

        let calls: Vec<_> = (0..2)
            .map(|_| {
                let engine = engine.clone();
                tokio::spawn(async move { engine.call(ConfigNode::empty("get")).await })
            })
            .collect();
        next_request(&mut device).await;
        next_request(&mut device).await;
        drop(device);

        for call in calls {
            assert!(matches!(call.await.unwrap(), Err(NetconfError::TransportClosed)));
        }
        state.wait_for(|s| *s == EngineState::Closed).await.unwrap();
        assert!(engine.is_closed());
        assert!(matches!(
            engine.call(ConfigNode::empty("get")).await,
            Err(NetconfError::TransportClosed)
        ));
        assert!(events
            .lock()
            .iter()
            .any(|e| matches!(e, SessionEvent::Closed { reason: Some(_) })));
    }

    #[tokio::test]
    async fn test_chunked_framing_after_base_1_1() {
        let (engine, mut device) = start_pair(SessionConfig::default(), HELLO_1_1, None).await;
        assert_eq!(engine.base_version(), BaseVersion::V1_1);

        let call = engine.call(ConfigNode::empty("get"));
        let device_side = async {
            let (id, _) = next_request(&mut device).await;
            device.send(&ok_reply(id)).await.unwrap();
        };
        let (reply, ()) = tokio::join!(call, device_side);
        assert!(reply.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_version_mismatch_is_connection_error() {
        let (a, b) = tokio::io::duplex(4096);
        let mut device = FramedTransport::new(b, 1 << 20);
        let config = SessionConfig::default().base_1_0_only();

        let (started, ()) = tokio::join!(
            RpcEngine::start(Box::new(FramedTransport::new(a, 1 << 20)), &config, None),
            async {
                device.receive().await.unwrap();
                device.send(HELLO_1_1).await.unwrap();
            }
        );
        assert!(matches!(started, Err(NetconfError::Connection(_))));
    }

    #[tokio::test]
    async fn test_shutdown_closes_transport() {
        let (engine, mut device) = start_pair(SessionConfig::default(), HELLO_1_0, None).await;
        engine.shutdown().await;
        engine.shutdown().await;

        assert_eq!(engine.state(), EngineState::Closed);
        assert!(device.receive().await.is_err());
    }
}
