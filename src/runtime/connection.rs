//! Connection state machine for worker-owned TCP connections.
//!
//! Each connection lives on exactly one worker for its whole life. It tracks
//! its reassembly buffer and where it is in the session: applying
//! operations, flushing the counter reply, or done.

use crate::protocol::FRAME_LEN;
use crate::runtime::buffer::FrameBuffer;
use mio::net::TcpStream;
use slab::Slab;
use std::net::SocketAddr;

/// Current state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Reading frames and applying operations.
    Active,
    /// TERMINATE processed; writing the counter reply.
    Closing {
        /// Encoded COUNTER_REPLY frame.
        reply: [u8; FRAME_LEN],
        /// Bytes already written.
        written: usize,
    },
    /// Session over; the socket is about to be released.
    Closed,
}

/// A single client connection.
#[derive(Debug)]
pub struct Connection {
    pub stream: TcpStream,
    pub peer: Option<SocketAddr>,
    pub buffer: FrameBuffer,
    pub state: ConnState,
    /// Already sitting in the worker backlog.
    pub queued: bool,
}

impl Connection {
    /// Create a new connection in the active state.
    pub fn new(stream: TcpStream, max_payload_len: u32) -> Self {
        let peer = stream.peer_addr().ok();
        Self {
            stream,
            peer,
            buffer: FrameBuffer::new(max_payload_len),
            state: ConnState::Active,
            queued: false,
        }
    }

    /// Transition to writing the counter reply.
    pub fn start_reply(&mut self, reply: [u8; FRAME_LEN]) {
        self.state = ConnState::Closing { reply, written: 0 };
    }

    /// Mark the session as finished.
    pub fn close(&mut self) {
        self.state = ConnState::Closed;
    }
}

/// Registry of one worker's connections using slab allocation.
///
/// Slab keys double as mio tokens.
pub struct ConnectionRegistry {
    connections: Slab<Connection>,
    max_connections: usize,
}

impl ConnectionRegistry {
    /// Create a new registry with specified maximum capacity.
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: Slab::with_capacity(max_connections.min(1024)),
            max_connections,
        }
    }

    /// Insert a new connection into the registry.
    ///
    /// Hands the connection back if the registry is at capacity.
    pub fn insert(&mut self, conn: Connection) -> Result<usize, Connection> {
        if self.connections.len() >= self.max_connections {
            return Err(conn);
        }
        Ok(self.connections.insert(conn))
    }

    /// Get a mutable reference to a connection.
    pub fn get_mut(&mut self, id: usize) -> Option<&mut Connection> {
        self.connections.get_mut(id)
    }

    /// Remove a connection from the registry.
    pub fn remove(&mut self, id: usize) -> Option<Connection> {
        self.connections.try_remove(id)
    }

    /// Whether `id` names a live connection.
    pub fn contains(&self, id: usize) -> bool {
        self.connections.contains(id)
    }

    /// Number of active connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Whether the registry holds no connections.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Remove every connection, e.g. on shutdown.
    pub fn drain(&mut self) -> impl Iterator<Item = Connection> + '_ {
        self.connections.drain()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::protocol::{Message, DEFAULT_MAX_PAYLOAD_LEN};
    use std::net::TcpListener;

    /// A connected (server side, client side) loopback pair.
    pub(crate) fn socket_pair() -> (TcpStream, std::net::TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = std::net::TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        server.set_nonblocking(true).unwrap();
        (TcpStream::from_std(server), client)
    }

    fn connection() -> Connection {
        Connection::new(socket_pair().0, DEFAULT_MAX_PAYLOAD_LEN)
    }

    #[test]
    fn test_connection_state_transitions() {
        let mut conn = connection();
        assert_eq!(conn.state, ConnState::Active);
        assert!(conn.peer.is_some());

        let reply = Message::CounterReply(6).to_frame();
        conn.start_reply(reply);
        assert_eq!(conn.state, ConnState::Closing { reply, written: 0 });

        conn.close();
        assert_eq!(conn.state, ConnState::Closed);
    }

    #[test]
    fn test_connection_registry() {
        let mut registry = ConnectionRegistry::new(2);

        let id1 = registry.insert(connection()).unwrap();
        let id2 = registry.insert(connection()).unwrap();

        // At capacity
        assert!(registry.insert(connection()).is_err());

        assert_eq!(registry.len(), 2);
        assert!(registry.get_mut(id2).is_some());

        assert!(registry.remove(id1).is_some());
        assert!(registry.remove(id1).is_none());
        assert!(!registry.contains(id1));
        assert_eq!(registry.len(), 1);

        // Freed slot is reusable
        let id3 = registry.insert(connection()).unwrap();
        assert_eq!(id3, id1);

        assert_eq!(registry.drain().count(), 2);
        assert!(registry.is_empty());
    }
}
