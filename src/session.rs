//! NETCONF sessions
//!
//! A [`Session`] is one authenticated connection plus its negotiated
//! capabilities. It is cheap to clone; all clones drive the same connection,
//! so independent tasks can pipeline requests over it.

use std::sync::Arc;

use tracing::{debug, info};

use crate::config::SessionConfig;
use crate::endpoint::Endpoint;
use crate::error::Result;
use crate::events::{EventHook, SessionEvent, emit};
use crate::hello::{BaseVersion, Capabilities};
use crate::messages::RpcReply;
use crate::node::ConfigNode;
use crate::rpc::{EngineState, RpcEngine};
use crate::transport::{self, Transport};

/// Lifecycle of a session.
///
/// `Disconnected` and `Connecting` are only observable through events and
/// logs, since a `Session` value exists once the hello exchange succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    HelloExchanged,
    Ready,
    Closed,
}

#[derive(Clone)]
pub struct Session {
    endpoint: Endpoint,
    engine: RpcEngine,
    session_id: Option<u32>,
    capabilities: Arc<Capabilities>,
}

impl Session {
    /// Open a transport to `endpoint` and perform the hello exchange
    pub async fn connect(endpoint: Endpoint, config: &SessionConfig, hook: Option<EventHook>) -> Result<Self> {
        info!(%endpoint, "connecting");
        emit(
            hook.as_ref(),
            SessionEvent::Connecting {
                endpoint: endpoint.to_string(),
            },
        );
        let transport = transport::open(&endpoint, config).await?;
        Self::establish(endpoint, transport, config, hook).await
    }

    /// Run the hello exchange over an already open transport
    pub async fn establish(
        endpoint: Endpoint,
        transport: Box<dyn Transport>,
        config: &SessionConfig,
        hook: Option<EventHook>,
    ) -> Result<Self> {
        let (engine, hello) = RpcEngine::start(transport, config, hook).await?;
        info!(
            %endpoint,
            session_id = ?hello.session_id,
            version = ?engine.base_version(),
            "session ready"
        );
        Ok(Self {
            endpoint,
            engine,
            session_id: hello.session_id,
            capabilities: Arc::new(hello.capabilities),
        })
    }

    /// Device this session is connected to
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Session id assigned by the device, if it sent one
    pub fn session_id(&self) -> Option<u32> {
        self.session_id
    }

    /// Capabilities advertised by the device
    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    /// True when the device advertised `capability`
    pub fn supports(&self, capability: &str) -> bool {
        self.capabilities.supports(capability)
    }

    /// Base protocol version in use
    pub fn base_version(&self) -> BaseVersion {
        self.engine.base_version()
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        match self.engine.state() {
            EngineState::Ready => SessionState::Ready,
            EngineState::Closed => SessionState::Closed,
            EngineState::Idle | EngineState::HelloSent | EngineState::HelloReceived => {
                SessionState::HelloExchanged
            }
        }
    }

    /// Underlying RPC engine
    pub fn engine(&self) -> &RpcEngine {
        &self.engine
    }

    /// Send an arbitrary operation and wait for the correlated reply
    pub async fn rpc(&self, operation: ConfigNode) -> Result<RpcReply> {
        self.engine.call(operation).await
    }

    /// Send `<close-session/>` (best-effort) and release the connection.
    ///
    /// Safe to call more than once or after the device hung up.
    pub async fn close(&self) -> Result<()> {
        if !self.engine.is_closed() {
            match self.engine.call(ConfigNode::empty("close-session")).await {
                Ok(reply) if reply.is_ok() => debug!("close-session acknowledged"),
                Ok(reply) => debug!(?reply, "close-session refused"),
                Err(e) => debug!(error = %e, "close-session failed"),
            }
        }
        self.engine.shutdown().await;
        Ok(())
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("endpoint", &self.endpoint)
            .field("session_id", &self.session_id)
            .field("state", &self.state())
            .finish()
    }
}
