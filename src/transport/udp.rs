//! UDP transport
//!
//! Datagrams carry an application-level fragment header so frames larger
//! than one datagram survive the trip: `RMCP <message-id> <index> <count>\n`
//! followed by the chunk bytes. Single-fragment messages take the same
//! path with `count == 1`. Fragments are reassembled per peer and
//! message id; an incomplete message is dropped when its peer sends a
//! newer one. Retransmission is left to the peer.
//!
//! Each peer address is bound to its own connection-scoped session.

use async_trait::async_trait;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::net::UdpSocket;
use tokio::sync::Mutex;

use crate::core::error::{McpError, McpResult};
use crate::protocol::version::ProtocolVersion;
use crate::server::session::generate_session_id;
use crate::transport::traits::{
    DebugHandler, IncomingEnvelope, MessageHandler, OutboundEnvelope, ServerTransport,
    TransportShared,
};

/// Payload bytes per fragment, chosen to stay under common MTU-sized
/// datagram limits with header room to spare
pub const FRAGMENT_PAYLOAD: usize = 16 * 1024;

const HEADER_TAG: &str = "RMCP";

/// Split a frame into header-tagged datagrams
pub(crate) fn fragment(message_id: u64, payload: &[u8]) -> Vec<Vec<u8>> {
    let chunks: Vec<&[u8]> = if payload.is_empty() {
        vec![&[]]
    } else {
        payload.chunks(FRAGMENT_PAYLOAD).collect()
    };
    let count = chunks.len();
    chunks
        .into_iter()
        .enumerate()
        .map(|(index, chunk)| {
            let mut datagram =
                format!("{HEADER_TAG} {message_id} {index} {count}\n").into_bytes();
            datagram.extend_from_slice(chunk);
            datagram
        })
        .collect()
}

/// Parsed fragment header plus chunk
pub(crate) struct Fragment<'a> {
    message_id: u64,
    index: usize,
    count: usize,
    chunk: &'a [u8],
}

/// Parse one datagram; None when the header is malformed
pub(crate) fn parse_fragment(datagram: &[u8]) -> Option<Fragment<'_>> {
    let newline = datagram.iter().position(|&b| b == b'\n')?;
    let header = std::str::from_utf8(&datagram[..newline]).ok()?;
    let mut parts = header.split(' ');
    if parts.next()? != HEADER_TAG {
        return None;
    }
    let message_id = parts.next()?.parse().ok()?;
    let index = parts.next()?.parse().ok()?;
    let count: usize = parts.next()?.parse().ok()?;
    if parts.next().is_some() || count == 0 || index >= count {
        return None;
    }
    Some(Fragment {
        message_id,
        index,
        count,
        chunk: &datagram[newline + 1..],
    })
}

/// Per-peer reassembly buffer
#[derive(Default)]
struct Reassembly {
    message_id: u64,
    received: usize,
    chunks: Vec<Option<Vec<u8>>>,
}

impl Reassembly {
    /// Feed one fragment; returns the full frame when complete
    fn feed(&mut self, fragment: Fragment<'_>) -> Option<Vec<u8>> {
        if fragment.message_id != self.message_id || self.chunks.len() != fragment.count {
            // A newer message preempts an incomplete one
            self.message_id = fragment.message_id;
            self.received = 0;
            self.chunks = vec![None; fragment.count];
        }
        if self.chunks[fragment.index].is_none() {
            self.chunks[fragment.index] = Some(fragment.chunk.to_vec());
            self.received += 1;
        }
        if self.received < self.chunks.len() {
            return None;
        }
        let mut assembled = Vec::new();
        for chunk in self.chunks.drain(..) {
            assembled.extend_from_slice(&chunk?);
        }
        self.received = 0;
        Some(assembled)
    }
}

struct PeerState {
    session_id: String,
    reassembly: Reassembly,
}

type PeerMap = Arc<Mutex<HashMap<SocketAddr, PeerState>>>;

/// UDP transport for MCP servers
pub struct UdpServerTransport {
    shared: Arc<TransportShared>,
    bind_addr: String,
    socket: Mutex<Option<Arc<UdpSocket>>>,
    peers: PeerMap,
    sessions: Mutex<HashMap<String, SocketAddr>>,
    next_message_id: AtomicU64,
}

impl UdpServerTransport {
    /// Create a transport bound to `addr` on start
    pub fn new(addr: String) -> Self {
        Self {
            shared: Arc::new(TransportShared::new()),
            bind_addr: addr,
            socket: Mutex::new(None),
            peers: Arc::new(Mutex::new(HashMap::new())),
            sessions: Mutex::new(HashMap::new()),
            next_message_id: AtomicU64::new(1),
        }
    }

    /// The locally bound address, once started
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        let socket = self.socket.lock().await;
        socket.as_ref().and_then(|s| s.local_addr().ok())
    }

    async fn send_to(&self, socket: &UdpSocket, payload: &[u8], addr: SocketAddr) -> McpResult<()> {
        let message_id = self.next_message_id.fetch_add(1, Ordering::Relaxed);
        for datagram in fragment(message_id, payload) {
            socket
                .send_to(&datagram, addr)
                .await
                .map_err(|e| McpError::transport(format!("UDP send failed: {e}")))?;
        }
        Ok(())
    }
}

#[async_trait]
impl ServerTransport for UdpServerTransport {
    async fn initialize(&self) -> McpResult<()> {
        if self.socket.lock().await.is_some() {
            return Ok(());
        }
        let socket = UdpSocket::bind(&self.bind_addr)
            .await
            .map_err(|e| McpError::transport(format!("Failed to bind UDP socket: {e}")))?;
        let mut slot = self.socket.lock().await;
        *slot = Some(Arc::new(socket));
        Ok(())
    }

    async fn start(&self) -> McpResult<()> {
        if self.socket.lock().await.is_none() {
            self.initialize().await?;
        }
        let socket = self
            .socket
            .lock()
            .await
            .clone()
            .ok_or_else(|| McpError::transport("UDP socket not bound"))?;
        tracing::debug!(addr = %socket.local_addr().map_err(McpError::io)?, "udp transport listening");
        self.shared.set_running(true);

        let stop = self.shared.stop_token();
        let mut buffer = vec![0u8; FRAGMENT_PAYLOAD + 256];
        loop {
            let received = tokio::select! {
                received = socket.recv_from(&mut buffer) => received,
                _ = stop.cancelled() => break,
            };

            let (size, addr) = match received {
                Ok(pair) => pair,
                Err(e) => {
                    tracing::warn!("udp receive failed: {e}");
                    continue;
                }
            };

            let Some(parsed_fragment) = parse_fragment(&buffer[..size]) else {
                self.shared.debug(&String::from_utf8_lossy(&buffer[..size]));
                continue;
            };

            let (session_id, assembled) = {
                let mut peers = self.peers.lock().await;
                let peer = peers.entry(addr).or_insert_with(|| PeerState {
                    session_id: generate_session_id(),
                    reassembly: Reassembly::default(),
                });
                (peer.session_id.clone(), peer.reassembly.feed(parsed_fragment))
            };
            {
                let mut sessions = self.sessions.lock().await;
                sessions.insert(session_id.clone(), addr);
            }

            let Some(frame) = assembled else { continue };
            let Ok(payload) = String::from_utf8(frame) else {
                continue;
            };

            let shared = self.shared.clone();
            let socket = socket.clone();
            let next_id = self.next_message_id.fetch_add(1, Ordering::Relaxed);
            tokio::spawn(async move {
                let envelope = IncomingEnvelope {
                    payload,
                    session_id: Some(session_id),
                    env: HashMap::new(),
                };
                if let Some(reply) = shared.dispatch(envelope).await {
                    for datagram in fragment(next_id, reply.payload.as_bytes()) {
                        if let Err(e) = socket.send_to(&datagram, addr).await {
                            tracing::warn!("udp reply failed: {e}");
                            break;
                        }
                    }
                }
            });
        }

        self.shared.set_running(false);
        Ok(())
    }

    async fn stop(&self) -> McpResult<()> {
        self.shared.trigger_stop();
        Ok(())
    }

    async fn send(&self, envelope: OutboundEnvelope) -> McpResult<()> {
        let socket = self
            .socket
            .lock()
            .await
            .clone()
            .ok_or_else(|| McpError::transport("UDP socket not bound"))?;
        let sessions = self.sessions.lock().await;
        match &envelope.session_id {
            Some(session_id) => {
                let addr = sessions.get(session_id).ok_or_else(|| {
                    McpError::connection(format!("No peer for session {session_id}"))
                })?;
                self.send_to(&socket, envelope.payload.as_bytes(), *addr).await
            }
            None => {
                for addr in sessions.values() {
                    self.send_to(&socket, envelope.payload.as_bytes(), *addr)
                        .await?;
                }
                Ok(())
            }
        }
    }

    fn set_message_handler(&self, handler: MessageHandler) {
        self.shared.set_handler(handler);
    }

    fn set_protocol_version(&self, version: ProtocolVersion) {
        self.shared.set_version(version);
    }

    fn set_debug_handler(&self, handler: DebugHandler) {
        self.shared.set_debug(handler);
    }

    fn evicts_idle_sessions(&self) -> bool {
        true
    }

    fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    fn transport_info(&self) -> String {
        format!("udp transport ({})", self.bind_addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fragment_round_trip_small() {
        let datagrams = fragment(7, b"hello");
        assert_eq!(datagrams.len(), 1);
        let parsed = parse_fragment(&datagrams[0]).unwrap();
        assert_eq!(parsed.message_id, 7);
        assert_eq!(parsed.index, 0);
        assert_eq!(parsed.count, 1);
        assert_eq!(parsed.chunk, b"hello");
    }

    #[test]
    fn test_fragment_round_trip_large() {
        let payload = vec![b'x'; FRAGMENT_PAYLOAD * 2 + 17];
        let datagrams = fragment(3, &payload);
        assert_eq!(datagrams.len(), 3);

        let mut reassembly = Reassembly::default();
        let mut result = None;
        for datagram in &datagrams {
            result = reassembly.feed(parse_fragment(datagram).unwrap());
        }
        assert_eq!(result.unwrap(), payload);
    }

    #[test]
    fn test_reassembly_out_of_order() {
        let payload = vec![b'y'; FRAGMENT_PAYLOAD + 5];
        let datagrams = fragment(9, &payload);
        assert_eq!(datagrams.len(), 2);

        let mut reassembly = Reassembly::default();
        assert!(reassembly
            .feed(parse_fragment(&datagrams[1]).unwrap())
            .is_none());
        let result = reassembly.feed(parse_fragment(&datagrams[0]).unwrap());
        assert_eq!(result.unwrap(), payload);
    }

    #[test]
    fn test_newer_message_preempts_incomplete() {
        let first = fragment(1, &vec![b'a'; FRAGMENT_PAYLOAD + 1]);
        let second = fragment(2, b"done");

        let mut reassembly = Reassembly::default();
        assert!(reassembly.feed(parse_fragment(&first[0]).unwrap()).is_none());
        let result = reassembly.feed(parse_fragment(&second[0]).unwrap());
        assert_eq!(result.unwrap(), b"done");
    }

    #[test]
    fn test_malformed_header_rejected() {
        assert!(parse_fragment(b"no header here").is_none());
        assert!(parse_fragment(b"RMCP 1 2 2").is_none()); // no newline
        assert!(parse_fragment(b"RMCP 1 5 2\nx").is_none()); // index out of range
        assert!(parse_fragment(b"OTHER 1 0 1\nx").is_none());
    }

    #[tokio::test]
    async fn test_udp_request_reply() {
        use crate::protocol::types::{JsonRpcRequest, JsonRpcResponse, RequestId};
        use serde_json::{Value, json};

        let transport = Arc::new(UdpServerTransport::new("127.0.0.1:0".to_string()));
        transport.set_message_handler(Arc::new(|envelope: IncomingEnvelope| {
            Box::pin(async move {
                let request: JsonRpcRequest = serde_json::from_str(&envelope.payload).ok()?;
                let response = JsonRpcResponse::success(request.id, json!({"via": "udp"}));
                Some(OutboundEnvelope {
                    payload: serde_json::to_string(&response).ok()?,
                    session_id: envelope.session_id,
                })
            })
        }));

        transport.initialize().await.unwrap();
        let server_addr = transport.local_addr().await.unwrap();
        let serve = {
            let transport = transport.clone();
            tokio::spawn(async move { transport.start().await })
        };

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let request =
            JsonRpcRequest::new(RequestId::Number(1), "ping", None::<Value>).unwrap();
        let payload = serde_json::to_string(&request).unwrap();
        for datagram in fragment(1, payload.as_bytes()) {
            client.send_to(&datagram, server_addr).await.unwrap();
        }

        let mut buffer = vec![0u8; 64 * 1024];
        let (size, _) = client.recv_from(&mut buffer).await.unwrap();
        let parsed = parse_fragment(&buffer[..size]).unwrap();
        let reply: Value = serde_json::from_slice(parsed.chunk).unwrap();
        assert_eq!(reply["result"]["via"], json!("udp"));

        transport.stop().await.unwrap();
        serve.await.unwrap().unwrap();
    }
}
