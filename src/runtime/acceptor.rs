//! Acceptor reactor.
//!
//! Owns the listening socket and a poll of its own. Every accepted
//! connection is handed to a worker in round-robin order and never touched
//! again by this thread.
//!
//! Listener readiness is edge-triggered. When accepting stops on a resource
//! error (EMFILE, ENFILE, ENOBUFS) the queued connections will not raise a
//! new event, so the acceptor switches to a timed poll and retries until the
//! queue drains.

use crate::runtime::pool::ReactorPool;
use mio::net::TcpListener;
use mio::{Events, Interest, Poll, Token, Waker};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const LISTENER_TOKEN: Token = Token(0);
const WAKE_TOKEN: Token = Token(1);

/// Poll timeout while a stalled accept queue is being retried.
const ACCEPT_RETRY_INTERVAL: Duration = Duration::from_millis(50);

pub struct Acceptor {
    poll: Poll,
    listener: TcpListener,
    pool: ReactorPool,
    waker: Arc<Waker>,
    shutdown: Arc<AtomicBool>,
    /// The last accept batch ended on an error with connections possibly
    /// still queued.
    retry_accept: bool,
}

impl Acceptor {
    pub fn new(
        mut listener: TcpListener,
        pool: ReactorPool,
        shutdown: Arc<AtomicBool>,
    ) -> io::Result<Self> {
        let poll = Poll::new()?;
        poll.registry()
            .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKE_TOKEN)?);

        Ok(Self {
            poll,
            listener,
            pool,
            waker,
            shutdown,
            retry_accept: false,
        })
    }

    pub(crate) fn waker(&self) -> Arc<Waker> {
        Arc::clone(&self.waker)
    }

    /// Accept and dispatch until shutdown is requested.
    pub fn run(mut self) -> io::Result<()> {
        let mut events = Events::with_capacity(64);
        info!(workers = self.pool.len(), "Acceptor started");

        while self.turn(&mut events)? {}

        info!(dispatched = self.pool.dispatched(), "Acceptor stopped");
        Ok(())
    }

    /// One poll round. Returns `false` once shutdown is requested.
    fn turn(&mut self, events: &mut Events) -> io::Result<bool> {
        let timeout = self.retry_accept.then_some(ACCEPT_RETRY_INTERVAL);
        match self.poll.poll(events, timeout) {
            Ok(()) => {}
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => return Ok(true),
            Err(e) => return Err(e),
        }

        if self.shutdown.load(Ordering::Acquire) {
            return Ok(false);
        }

        let listener_ready = events.iter().any(|event| event.token() == LISTENER_TOKEN);
        if listener_ready || self.retry_accept {
            self.retry_accept = self.accept_connections();
        }
        Ok(true)
    }

    /// Drain the accept queue.
    ///
    /// Returns `true` if accepting stopped on an error before the queue was
    /// known to be empty.
    fn accept_connections(&mut self) -> bool {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => match self.pool.dispatch(stream) {
                    Ok(worker) => debug!(worker, peer = %peer, "Dispatched connection"),
                    Err(e) => error!(peer = %peer, error = %e, "Dropping connection"),
                },
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return false,
                Err(ref e) if is_transient(e) => continue,
                Err(e) => {
                    // e.g. out of file descriptors
                    warn!(error = %e, "Accept error, retrying");
                    return true;
                }
            }
        }
    }
}

/// Accept errors that concern a single connection, not the listener.
fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::Interrupted | io::ErrorKind::ConnectionAborted
    )
}

/// Create a non-blocking TCP listener.
pub fn create_listener(addr: SocketAddr, backlog: i32) -> io::Result<TcpListener> {
    let socket = socket2::Socket::new(
        socket2::Domain::for_address(addr),
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;

    Ok(TcpListener::from_std(socket.into()))
}
