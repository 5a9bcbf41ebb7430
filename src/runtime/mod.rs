//! Multi-reactor runtime.
//!
//! One acceptor thread plus N worker threads, each blocked in its own mio
//! poll:
//! - `Acceptor`: owns the listener, hands connections out round-robin
//! - `Worker`: owns a disjoint set of connections for their whole lifetime
//! - `ReactorPool`: the fixed, ordered set of workers
//! - `FrameBuffer`: per-connection frame reassembly
//!
//! The only mutable state shared between threads is the `SharedCounter`,
//! plus the console reporter every reply value is printed through.

pub mod acceptor;
pub mod buffer;
pub mod connection;
pub mod pool;
pub mod worker;

pub use acceptor::Acceptor;
pub use buffer::FrameBuffer;
pub use pool::{ReactorPool, RoundRobin};
pub use worker::{Worker, WorkerHandle};

use crate::config::Config;
use crate::counter::SharedCounter;
use crate::report::DynReporter;
use mio::net::TcpListener;
use mio::Waker;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{error, info};

/// A bound, not yet running server.
///
/// Binding is separate from starting so that listener failures surface
/// before any thread is spawned.
pub struct Server {
    config: Config,
    listener: TcpListener,
    counter: Arc<SharedCounter>,
    reporter: Arc<DynReporter>,
}

impl Server {
    /// Bind the listening socket described by `config`.
    pub fn bind(config: Config) -> io::Result<Self> {
        let addr = resolve(&config.host, config.port)?;
        let listener = acceptor::create_listener(addr, config.backlog)?;

        Ok(Self {
            config,
            listener,
            counter: SharedCounter::shared(),
            reporter: Arc::new(DynReporter::boxed(std::io::stdout())),
        })
    }

    /// Print reply values to `reporter` instead of stdout.
    pub fn with_reporter(mut self, reporter: Arc<DynReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn counter(&self) -> Arc<SharedCounter> {
        Arc::clone(&self.counter)
    }

    /// Spawn the worker and acceptor threads.
    pub fn start(self) -> io::Result<ServerHandle> {
        let local_addr = self.listener.local_addr()?;
        let shutdown = Arc::new(AtomicBool::new(false));

        // Create every poll up front: failures here are startup errors.
        let mut workers = Vec::with_capacity(self.config.workers);
        let mut handles = Vec::with_capacity(self.config.workers);
        for worker_id in 0..self.config.workers {
            let (worker, handle) = Worker::new(
                worker_id,
                &self.config,
                Arc::clone(&self.counter),
                Arc::clone(&self.reporter),
                Arc::clone(&shutdown),
            )?;
            workers.push(worker);
            handles.push(handle);
        }

        let mut wakers: Vec<Arc<Waker>> = handles.iter().map(WorkerHandle::waker).collect();
        let acceptor = Acceptor::new(
            self.listener,
            ReactorPool::new(handles),
            Arc::clone(&shutdown),
        )?;
        wakers.push(acceptor.waker());

        info!(
            workers = self.config.workers,
            addr = %local_addr,
            "Starting reactors"
        );

        let mut threads = Vec::with_capacity(self.config.workers + 1);
        for (worker_id, worker) in workers.into_iter().enumerate() {
            let handle = thread::Builder::new()
                .name(format!("worker-{worker_id}"))
                .spawn(move || {
                    if let Err(e) = worker.run() {
                        error!(worker = worker_id, error = %e, "Worker failed");
                    }
                })?;
            threads.push(handle);
        }

        let handle = thread::Builder::new()
            .name("acceptor".to_string())
            .spawn(move || {
                if let Err(e) = acceptor.run() {
                    error!(error = %e, "Acceptor failed");
                }
            })?;
        threads.push(handle);

        Ok(ServerHandle {
            local_addr,
            counter: self.counter,
            shutdown,
            wakers,
            threads,
        })
    }
}

/// A running server.
pub struct ServerHandle {
    local_addr: SocketAddr,
    counter: Arc<SharedCounter>,
    shutdown: Arc<AtomicBool>,
    wakers: Vec<Arc<Waker>>,
    threads: Vec<JoinHandle<()>>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn counter(&self) -> Arc<SharedCounter> {
        Arc::clone(&self.counter)
    }

    /// Block until every reactor thread has exited.
    pub fn wait(self) {
        for handle in self.threads {
            let _ = handle.join();
        }
    }

    /// Stop all reactors and wait for them. Open connections are closed.
    pub fn shutdown(self) {
        self.shutdown.store(true, Ordering::Release);
        for waker in &self.wakers {
            if let Err(e) = waker.wake() {
                error!(error = %e, "Failed to wake reactor");
            }
        }
        let counter = self.counter.snapshot();
        self.wait();
        info!(counter, "Server stopped");
    }
}

/// Bind, start and serve until the reactors exit.
pub fn run(config: Config) -> io::Result<()> {
    Server::bind(config)?.start()?.wait();
    Ok(())
}

fn resolve(host: &str, port: u16) -> io::Result<SocketAddr> {
    (host, port).to_socket_addrs()?.next().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("could not resolve {host}:{port}"),
        )
    })
}
