//! RESP node client over TCP or TLS
//!
//! One lazily opened connection per node, guarded by an async mutex so
//! concurrent callers take turns on the socket. Any transport failure drops
//! the socket; the next request reconnects. So does a request whose future
//! was dropped between writing the command and reading its reply, since the
//! unread reply would otherwise be handed to the next caller.

use crate::config::ClientOptions;
use crate::error::{ClusterError, Result};
use crate::node::{NodeAddress, NodeClient, NodeConnector};
use crate::resp::{self, Reply};
use async_trait::async_trait;
use bytes::BytesMut;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, warn};

trait Transport: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Transport for T {}

struct Connection {
    stream: Box<dyn Transport>,
    buf: BytesMut,
    /// Set while a request is written but its reply not yet decoded
    in_flight: bool,
}

impl Connection {
    async fn round_trip(&mut self, tokens: &[String], read_timeout: Duration) -> Result<Reply> {
        let frame = resp::encode_command(tokens);
        self.in_flight = true;
        self.stream
            .write_all(&frame)
            .await
            .map_err(|e| ClusterError::Connection(format!("write failed: {}", e)))?;
        let reply = self.read_reply(read_timeout).await?;
        self.in_flight = false;
        Ok(reply)
    }

    async fn read_reply(&mut self, read_timeout: Duration) -> Result<Reply> {
        loop {
            if let Some(reply) = resp::decode(&mut self.buf)? {
                return Ok(reply);
            }
            let read = timeout(read_timeout, self.stream.read_buf(&mut self.buf))
                .await
                .map_err(|_| {
                    ClusterError::Timeout(format!("no reply within {:?}", read_timeout))
                })?
                .map_err(|e| ClusterError::Connection(format!("read failed: {}", e)))?;
            if read == 0 {
                return Err(ClusterError::Connection(
                    "connection closed by peer".to_string(),
                ));
            }
        }
    }
}

/// [`NodeClient`] speaking RESP2 to a single node
pub struct TcpNodeClient {
    address: NodeAddress,
    options: ClientOptions,
    conn: Mutex<Option<Connection>>,
}

impl TcpNodeClient {
    pub fn new(address: NodeAddress, options: ClientOptions) -> Self {
        Self {
            address,
            options,
            conn: Mutex::new(None),
        }
    }

    async fn open(&self) -> Result<Connection> {
        let target = self.address.to_string();
        let tcp = timeout(
            self.options.connect_timeout,
            TcpStream::connect(target.as_str()),
        )
        .await
        .map_err(|_| ClusterError::Timeout(format!("connect to {} timed out", target)))?
        .map_err(|e| ClusterError::Connection(format!("connect to {}: {}", target, e)))?;
        if let Err(e) = tcp.set_nodelay(true) {
            debug!(address = %self.address, error = %e, "Failed to set TCP_NODELAY");
        }

        let stream: Box<dyn Transport> = if self.options.tls {
            let connector = tokio_native_tls::native_tls::TlsConnector::new()
                .map_err(|e| ClusterError::Connection(format!("TLS setup failed: {}", e)))?;
            let tls = tokio_native_tls::TlsConnector::from(connector)
                .connect(&self.address.host, tcp)
                .await
                .map_err(|e| {
                    ClusterError::Connection(format!("TLS handshake with {}: {}", target, e))
                })?;
            Box::new(tls)
        } else {
            Box::new(tcp)
        };

        let mut conn = Connection {
            stream,
            buf: BytesMut::with_capacity(4096),
            in_flight: false,
        };

        if let Some(password) = &self.options.password {
            let mut tokens = vec!["AUTH".to_string()];
            if let Some(user) = &self.options.username {
                tokens.push(user.clone());
            }
            tokens.push(password.clone());
            if let Reply::Error(msg) = conn.round_trip(&tokens, self.options.read_timeout).await? {
                return Err(ClusterError::Connection(format!(
                    "AUTH failed on {}: {}",
                    target, msg
                )));
            }
        }

        debug!(address = %self.address, tls = self.options.tls, "Connected to node");
        Ok(conn)
    }

    /// Drop a connection left mid-request by a cancelled caller
    fn discard_interrupted(&self, slot: &mut Option<Connection>) {
        if slot.as_ref().is_some_and(|conn| conn.in_flight) {
            warn!(address = %self.address, "Dropping connection with an unread reply");
            *slot = None;
        }
    }

    /// One request/reply on the held connection, opening it first if needed
    async fn exchange(&self, slot: &mut Option<Connection>, tokens: &[String]) -> Result<Reply> {
        if slot.is_none() {
            *slot = Some(self.open().await?);
        }
        let conn = slot
            .as_mut()
            .ok_or_else(|| ClusterError::Connection(format!("{} not connected", self.address)))?;

        match conn.round_trip(tokens, self.options.read_timeout).await {
            Ok(Reply::Error(msg)) => Err(ClusterError::Command(msg)),
            Ok(reply) => Ok(reply),
            Err(e) => {
                warn!(address = %self.address, error = %e, "Dropping node connection");
                *slot = None;
                Err(e)
            }
        }
    }
}

fn command_tokens(command: &str, args: &[String]) -> Vec<String> {
    let mut tokens = Vec::with_capacity(args.len() + 1);
    tokens.push(command.to_string());
    tokens.extend(args.iter().cloned());
    tokens
}

#[async_trait]
impl NodeClient for TcpNodeClient {
    fn address(&self) -> &NodeAddress {
        &self.address
    }

    async fn send(&self, command: &str, args: &[String]) -> Result<Reply> {
        self.send_raw(&command_tokens(command, args)).await
    }

    async fn send_raw(&self, tokens: &[String]) -> Result<Reply> {
        let mut conn = self.conn.lock().await;
        self.discard_interrupted(&mut conn);
        self.exchange(&mut conn, tokens).await
    }

    async fn send_asking(&self, command: &str, args: &[String]) -> Result<Reply> {
        // ASKING only applies to the next command on the same connection
        let mut conn = self.conn.lock().await;
        self.discard_interrupted(&mut conn);
        match self.exchange(&mut conn, &["ASKING".to_string()]).await {
            Ok(_) => {}
            Err(ClusterError::Command(msg)) => {
                return Err(ClusterError::Connection(format!(
                    "ASKING rejected by {}: {}",
                    self.address, msg
                )));
            }
            Err(e) => return Err(e),
        }
        self.exchange(&mut conn, &command_tokens(command, args))
            .await
    }
}

/// Creates [`TcpNodeClient`]s
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

impl NodeConnector for TcpConnector {
    fn connect(
        &self,
        address: &NodeAddress,
        options: &ClientOptions,
    ) -> Result<Arc<dyn NodeClient>> {
        Ok(Arc::new(TcpNodeClient::new(address.clone(), options.clone())))
    }
}
