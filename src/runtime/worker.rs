//! Worker reactor.
//!
//! Readiness-based model: each worker owns a mio `Poll` (epoll on Linux,
//! kqueue on macOS) holding a disjoint set of connections handed over by
//! the acceptor. The worker reads whatever is available, reassembles
//! frames, applies them to the shared counter and, on TERMINATE, writes the
//! counter snapshot back, reports it on the console sink and closes the
//! socket.
//!
//! ## Fairness
//!
//! mio readiness is edge-triggered, so a socket has to be drained until
//! `WouldBlock` or it will not be reported again. To keep one busy client
//! from monopolizing the thread, each readiness event only reads up to
//! `read_budget` bytes. A connection that runs out of budget goes on the
//! backlog and is serviced again after the next non-blocking poll, behind
//! whatever else became ready in the meantime.

use crate::config::Config;
use crate::counter::SharedCounter;
use crate::protocol::{FrameError, Kind, Message};
use crate::report::DynReporter;
use crate::runtime::buffer::FrameBuffer;
use crate::runtime::connection::{ConnState, Connection, ConnectionRegistry};
use crossbeam_channel::{Receiver, Sender};
use mio::net::TcpStream;
use mio::{Events, Interest, Poll, Token, Waker};
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

/// Token reserved for the cross-thread waker. Slab keys never reach it.
pub(crate) const WAKE_TOKEN: Token = Token(usize::MAX);

/// Why a connection was torn down without a reply.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("protocol error: {0}")]
    Protocol(#[from] FrameError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("peer closed the connection before terminating")]
    PeerClosed,
}

/// The assigned worker is no longer accepting connections.
#[derive(Debug, Error)]
#[error("worker {worker} is no longer running")]
pub struct DispatchError {
    pub worker: usize,
}

/// Sending side of a worker, held by the acceptor's pool.
pub struct WorkerHandle {
    id: usize,
    inbox: Sender<TcpStream>,
    waker: Arc<Waker>,
}

impl WorkerHandle {
    /// Index of the worker behind this handle.
    pub fn id(&self) -> usize {
        self.id
    }

    /// Hand a freshly accepted connection over to this worker.
    ///
    /// Ownership moves with the stream; the worker registers it with its own
    /// poll the next time it wakes up.
    pub fn assign(&self, stream: TcpStream) -> Result<(), DispatchError> {
        self.inbox
            .send(stream)
            .map_err(|_| DispatchError { worker: self.id })?;
        self.waker
            .wake()
            .map_err(|_| DispatchError { worker: self.id })
    }

    pub(crate) fn waker(&self) -> Arc<Waker> {
        Arc::clone(&self.waker)
    }
}

/// Result of servicing one connection.
#[derive(Debug, PartialEq, Eq)]
enum Progress {
    /// Drained until the socket would block.
    Idle,
    /// Read budget spent with data possibly still pending.
    Budgeted,
    /// Reply written; release the connection.
    Finished,
}

/// One reactor thread's state.
pub struct Worker {
    id: usize,
    poll: Poll,
    inbox: Receiver<TcpStream>,
    connections: ConnectionRegistry,
    counter: Arc<SharedCounter>,
    reporter: Arc<DynReporter>,
    scratch: Vec<u8>,
    read_budget: usize,
    events_capacity: usize,
    max_payload_len: u32,
    backlog: VecDeque<usize>,
    shutdown: Arc<AtomicBool>,
}

impl Worker {
    /// Create a worker and the handle used to feed it connections.
    pub fn new(
        id: usize,
        config: &Config,
        counter: Arc<SharedCounter>,
        reporter: Arc<DynReporter>,
        shutdown: Arc<AtomicBool>,
    ) -> io::Result<(Worker, WorkerHandle)> {
        let poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKE_TOKEN)?);
        let (tx, rx) = crossbeam_channel::unbounded();

        let worker = Worker {
            id,
            poll,
            inbox: rx,
            connections: ConnectionRegistry::new(config.max_connections),
            counter,
            reporter,
            scratch: vec![0u8; config.read_chunk],
            read_budget: config.read_budget,
            events_capacity: config.events_capacity,
            max_payload_len: config.max_payload_len,
            backlog: VecDeque::new(),
            shutdown,
        };

        let handle = WorkerHandle {
            id,
            inbox: tx,
            waker,
        };

        Ok((worker, handle))
    }

    /// Run the event loop until shutdown is requested.
    pub fn run(mut self) -> io::Result<()> {
        let mut events = Events::with_capacity(self.events_capacity);
        info!(worker = self.id, "Worker started");

        loop {
            let timeout = if self.backlog.is_empty() {
                None
            } else {
                Some(Duration::ZERO)
            };

            if let Err(e) = self.poll.poll(&mut events, timeout) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(e);
            }

            if self.shutdown.load(Ordering::Acquire) {
                break;
            }

            // Connections that ran out of budget last round go after fresh events
            let pending = std::mem::take(&mut self.backlog);

            for event in events.iter() {
                match event.token() {
                    WAKE_TOKEN => self.adopt_pending(),
                    Token(conn_id) => {
                        if event.is_writable() || event.is_error() {
                            self.service(conn_id, Self::flush_reply);
                        }
                        if event.is_readable() || event.is_read_closed() || event.is_error() {
                            self.service(conn_id, Self::drain);
                        }
                    }
                }
            }

            for conn_id in pending {
                if let Some(conn) = self.connections.get_mut(conn_id) {
                    conn.queued = false;
                    self.service(conn_id, Self::drain);
                }
            }
        }

        let open = self.connections.len();
        for mut conn in self.connections.drain() {
            if let Err(e) = self.poll.registry().deregister(&mut conn.stream) {
                debug!(worker = self.id, peer = ?conn.peer, error = %e, "Failed to deregister");
            }
        }
        info!(worker = self.id, open, "Worker stopped");
        Ok(())
    }

    /// Register every connection waiting in the inbox.
    fn adopt_pending(&mut self) {
        while let Ok(stream) = self.inbox.try_recv() {
            self.adopt(stream);
        }
    }

    fn adopt(&mut self, stream: TcpStream) {
        let conn = Connection::new(stream, self.max_payload_len);
        let peer = conn.peer;

        let conn_id = match self.connections.insert(conn) {
            Ok(id) => id,
            Err(_) => {
                warn!(worker = self.id, ?peer, "Connection limit reached, dropping");
                return;
            }
        };

        let Some(conn) = self.connections.get_mut(conn_id) else {
            return;
        };
        if let Err(e) =
            self.poll
                .registry()
                .register(&mut conn.stream, Token(conn_id), Interest::READABLE)
        {
            warn!(worker = self.id, ?peer, error = %e, "Failed to register connection");
            self.connections.remove(conn_id);
            return;
        }

        debug!(worker = self.id, conn_id, ?peer, "Accepted connection");
    }

    /// Run one step of the state machine and act on the outcome.
    fn service(
        &mut self,
        conn_id: usize,
        step: fn(&mut Self, usize) -> Result<Progress, ConnectionError>,
    ) {
        if !self.connections.contains(conn_id) {
            return;
        }

        match step(self, conn_id) {
            Ok(Progress::Idle) => {}
            Ok(Progress::Budgeted) => {
                if let Some(conn) = self.connections.get_mut(conn_id) {
                    if !conn.queued {
                        conn.queued = true;
                        self.backlog.push_back(conn_id);
                    }
                }
            }
            Ok(Progress::Finished) => self.close_connection(conn_id),
            Err(ConnectionError::Protocol(e)) => {
                warn!(worker = self.id, conn_id, error = %e, "Protocol error, closing");
                self.close_connection(conn_id);
            }
            Err(e) => {
                debug!(worker = self.id, conn_id, error = %e, "Connection error");
                self.close_connection(conn_id);
            }
        }
    }

    /// Read up to the budget, applying every complete frame as it arrives.
    fn drain(&mut self, conn_id: usize) -> Result<Progress, ConnectionError> {
        let Some(conn) = self.connections.get_mut(conn_id) else {
            return Ok(Progress::Idle);
        };
        if conn.state != ConnState::Active {
            return Ok(Progress::Idle);
        }

        let mut budget = self.read_budget;
        while budget > 0 {
            let want = budget.min(self.scratch.len());
            let n = match conn.stream.read(&mut self.scratch[..want]) {
                Ok(0) => return Err(ConnectionError::PeerClosed),
                Ok(n) => n,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(Progress::Idle),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            budget -= n;
            conn.buffer.feed(&self.scratch[..n]);

            if let Some(value) = apply_frames(&mut conn.buffer, &self.counter)? {
                trace!(worker = self.id, conn_id, value, "Session terminated");
                conn.start_reply(Message::CounterReply(value).to_frame());
                if let Err(e) = self.reporter.report(value) {
                    warn!(worker = self.id, error = %e, "Failed to report counter value");
                }
                return self.flush_reply(conn_id);
            }
        }

        Ok(Progress::Budgeted)
    }

    /// Write as much of the pending reply as the socket accepts.
    fn flush_reply(&mut self, conn_id: usize) -> Result<Progress, ConnectionError> {
        let Some(conn) = self.connections.get_mut(conn_id) else {
            return Ok(Progress::Idle);
        };
        let ConnState::Closing { reply, mut written } = conn.state else {
            return Ok(Progress::Idle);
        };

        while written < reply.len() {
            match conn.stream.write(&reply[written..]) {
                Ok(0) => {
                    return Err(io::Error::new(io::ErrorKind::WriteZero, "write returned 0").into());
                }
                Ok(n) => written += n,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    conn.state = ConnState::Closing { reply, written };
                    self.poll.registry().reregister(
                        &mut conn.stream,
                        Token(conn_id),
                        Interest::WRITABLE,
                    )?;
                    return Ok(Progress::Idle);
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        conn.close();
        Ok(Progress::Finished)
    }

    fn close_connection(&mut self, conn_id: usize) {
        if let Some(mut conn) = self.connections.remove(conn_id) {
            if let Err(e) = self.poll.registry().deregister(&mut conn.stream) {
                debug!(worker = self.id, conn_id, error = %e, "Failed to deregister");
            }
            if conn.queued {
                self.backlog.retain(|&id| id != conn_id);
            }
            debug!(
                worker = self.id,
                conn_id,
                peer = ?conn.peer,
                replied = conn.state == ConnState::Closed,
                "Connection closed"
            );
        }
    }
}

/// Apply every complete frame in `buffer` to the counter, in receive order.
///
/// Returns the snapshot taken when TERMINATE is reached; frames after it are
/// left unread.
fn apply_frames(
    buffer: &mut FrameBuffer,
    counter: &SharedCounter,
) -> Result<Option<i64>, FrameError> {
    while let Some(message) = buffer.try_extract_frame()? {
        match message {
            Message::Add(v) => {
                counter.add(v);
            }
            Message::Subtract(v) => {
                counter.sub(v);
            }
            Message::Terminate => return Ok(Some(counter.snapshot())),
            Message::CounterReply(_) => return Err(FrameError::UnexpectedKind(Kind::CounterReply)),
        }
    }
    Ok(None)
}
