//! Framed transports carrying NETCONF messages
//!
//! A [`Transport`] moves whole messages; framing (end-of-message or chunked)
//! lives in [`FrameCodec`]. Connection failures are returned to the caller and
//! never retried here.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::{debug, trace};

use crate::config::SessionConfig;
use crate::endpoint::{Endpoint, Scheme};
use crate::error::{NetconfError, Result, TransportError};
use crate::framing::{FrameCodec, FramingMode};

/// Message-oriented connection to a device
#[async_trait]
pub trait Transport: Send {
    /// Send one complete message
    async fn send(&mut self, message: &str) -> Result<()>;

    /// Wait for the next complete message; fails once the peer disconnects
    async fn receive(&mut self) -> Result<String>;

    /// Switch to chunked framing (after a base:1.1 hello exchange)
    fn upgrade(&mut self);

    /// Release the connection; calling it again is a no-op
    async fn close(&mut self) -> Result<()>;
}

/// [`Transport`] over any tokio byte stream
pub struct FramedTransport<S> {
    framed: Framed<S, FrameCodec>,
    closed: bool,
}

impl<S> FramedTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wrap `stream`, starting with end-of-message framing
    pub fn new(stream: S, max_frame_len: usize) -> Self {
        Self {
            framed: Framed::new(stream, FrameCodec::new(max_frame_len)),
            closed: false,
        }
    }

    /// Framing currently in use
    pub fn framing(&self) -> FramingMode {
        self.framed.codec().mode()
    }
}

#[async_trait]
impl<S> Transport for FramedTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, message: &str) -> Result<()> {
        if self.closed {
            return Err(TransportError::Closed.into());
        }
        trace!(bytes = message.len(), "sending message");
        self.framed.send(message.to_string()).await?;
        Ok(())
    }

    async fn receive(&mut self) -> Result<String> {
        if self.closed {
            return Err(TransportError::Closed.into());
        }
        match self.framed.next().await {
            Some(Ok(message)) => {
                trace!(bytes = message.len(), "received message");
                Ok(message)
            }
            Some(Err(e)) => Err(e.into()),
            None => Err(TransportError::Closed.into()),
        }
    }

    fn upgrade(&mut self) {
        debug!("switching to chunked framing");
        self.framed.codec_mut().upgrade();
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        SinkExt::<String>::close(&mut self.framed).await?;
        Ok(())
    }
}

/// Open a transport to the endpoint; connection failures are reported, not retried
pub async fn open(endpoint: &Endpoint, config: &SessionConfig) -> Result<Box<dyn Transport>> {
    match endpoint.scheme {
        Scheme::Tcp => {
            let address = endpoint.socket_address();
            debug!(%address, "opening tcp transport");
            let stream = tokio::time::timeout(config.connect_timeout(), TcpStream::connect(&address))
                .await
                .map_err(|_| NetconfError::Connection(format!("timed out connecting to {}", address)))?
                .map_err(|e| NetconfError::Connection(format!("{}: {}", address, e)))?;
            stream
                .set_nodelay(true)
                .map_err(|e| NetconfError::Connection(e.to_string()))?;
            Ok(Box::new(FramedTransport::new(stream, config.max_frame_len)))
        }
        #[cfg(feature = "ssh")]
        Scheme::Ssh => ssh::open(endpoint, config).await,
        #[cfg(not(feature = "ssh"))]
        Scheme::Ssh => Err(NetconfError::Connection(
            "ssh transport requires the `ssh` feature".into(),
        )),
    }
}

#[cfg(feature = "ssh")]
mod ssh {
    //! NETCONF over the SSH `netconf` subsystem (RFC 6242)

    use std::net::ToSocketAddrs;

    use async_ssh2_lite::{AsyncChannel, AsyncSession, TokioTcpStream};
    use async_trait::async_trait;
    use tokio_util::compat::{Compat, FuturesAsyncReadCompatExt};
    use tracing::debug;

    use super::{FramedTransport, Transport};
    use crate::config::SessionConfig;
    use crate::endpoint::Endpoint;
    use crate::error::{NetconfError, Result};

    /// Keeps the SSH session alive for as long as the channel is in use
    pub struct SshTransport {
        inner: FramedTransport<Compat<AsyncChannel<TokioTcpStream>>>,
        _session: AsyncSession<TokioTcpStream>,
    }

    /// Connect to the device over SSH and start the `netconf` subsystem
    pub async fn open(endpoint: &Endpoint, config: &SessionConfig) -> Result<Box<dyn Transport>> {
        let connection = |e: &dyn std::fmt::Display| NetconfError::Connection(format!("{}: {}", endpoint, e));

        let address = endpoint
            .socket_address()
            .to_socket_addrs()
            .map_err(|e| connection(&e))?
            .next()
            .ok_or_else(|| NetconfError::Connection(format!("{}: no address", endpoint)))?;

        let username = endpoint
            .username
            .as_deref()
            .ok_or_else(|| NetconfError::Connection("ssh endpoint needs a username".into()))?;
        let password = endpoint.password.as_deref().unwrap_or_default();

        debug!(%endpoint, "opening ssh transport");
        let connect = async {
            let mut session = AsyncSession::<TokioTcpStream>::connect(address, None)
                .await
                .map_err(|e| connection(&e))?;
            session.handshake().await.map_err(|e| connection(&e))?;
            session
                .userauth_password(username, password)
                .await
                .map_err(|e| connection(&e))?;
            if !session.authenticated() {
                return Err(NetconfError::Connection(format!("{}: authentication failed", endpoint)));
            }

            let mut channel = session.channel_session().await.map_err(|e| connection(&e))?;
            channel.subsystem("netconf").await.map_err(|e| connection(&e))?;
            Ok((session, channel))
        };

        let (session, channel) = tokio::time::timeout(config.connect_timeout(), connect)
            .await
            .map_err(|_| NetconfError::Connection(format!("{}: connect timed out", endpoint)))??;

        Ok(Box::new(SshTransport {
            inner: FramedTransport::new(channel.compat(), config.max_frame_len),
            _session: session,
        }))
    }

    #[async_trait]
    impl Transport for SshTransport {
        async fn send(&mut self, message: &str) -> Result<()> {
            self.inner.send(message).await
        }

        async fn receive(&mut self) -> Result<String> {
            self.inner.receive().await
        }

        fn upgrade(&mut self) {
            self.inner.upgrade();
        }

        async fn close(&mut self) -> Result<()> {
            self.inner.close().await
        }
    }
}
