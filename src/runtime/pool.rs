//! Fixed pool of worker reactors and the round-robin assignment policy.

use crate::runtime::worker::{DispatchError, WorkerHandle};
use mio::net::TcpStream;

/// Round-robin cursor: the i-th assignment (0-indexed) goes to `i mod n`.
#[derive(Debug)]
pub struct RoundRobin {
    assigned: u64,
    slots: usize,
}

impl RoundRobin {
    /// # Panics
    /// Panics if `slots` is zero.
    pub fn new(slots: usize) -> Self {
        assert!(slots > 0, "round robin needs at least one slot");
        Self { assigned: 0, slots }
    }

    /// Index for the next assignment.
    pub fn next_slot(&mut self) -> usize {
        let slot = (self.assigned % self.slots as u64) as usize;
        self.assigned += 1;
        slot
    }

    /// Total assignments handed out so far.
    pub fn assigned(&self) -> u64 {
        self.assigned
    }
}

/// The ordered set of workers the acceptor distributes connections over.
///
/// Created once at startup and never resized.
pub struct ReactorPool {
    workers: Vec<WorkerHandle>,
    cursor: RoundRobin,
}

impl ReactorPool {
    /// # Panics
    /// Panics if `workers` is empty.
    pub fn new(workers: Vec<WorkerHandle>) -> Self {
        let cursor = RoundRobin::new(workers.len());
        Self { workers, cursor }
    }

    /// Number of workers.
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Number of connections dispatched so far, including failed handoffs.
    pub fn dispatched(&self) -> u64 {
        self.cursor.assigned()
    }

    /// Hand `stream` to the next worker in turn, returning its index.
    ///
    /// The slot is consumed even when the handoff fails, so assignment stays a
    /// pure function of the accept ordinal.
    pub fn dispatch(&mut self, stream: TcpStream) -> Result<usize, DispatchError> {
        let slot = self.cursor.next_slot();
        self.workers[slot].assign(stream)?;
        Ok(slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::counter::SharedCounter;
use crate::report::DynReporter;
    use crate::runtime::connection::tests::socket_pair;
    use crate::runtime::worker::Worker;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    #[test]
    fn test_round_robin_sequence() {
        let mut rr = RoundRobin::new(3);
        let slots: Vec<_> = (0..10).map(|_| rr.next_slot()).collect();
        assert_eq!(slots, vec![0, 1, 2, 0, 1, 2, 0, 1, 2, 0]);
        assert_eq!(rr.assigned(), 10);
    }

    #[test]
    fn test_single_slot() {
        let mut rr = RoundRobin::new(1);
        assert!((0..5).all(|_| rr.next_slot() == 0));
    }

    #[test]
    #[should_panic]
    fn test_zero_slots() {
        RoundRobin::new(0);
    }

    #[test]
    fn test_dispatch_follows_accept_order() {
        let counter = SharedCounter::shared();
        let shutdown = Arc::new(AtomicBool::new(false));
        let config = Config::default();

        // Workers are never run: their inboxes just queue the streams.
        let mut workers = Vec::new();
        let mut handles = Vec::new();
        for id in 0..4 {
            let (worker, handle) = Worker::new(
                id,
                &config,
                Arc::clone(&counter),
                Arc::new(DynReporter::boxed(std::io::sink())),
                Arc::clone(&shutdown),
            )
            .unwrap();
            workers.push(worker);
            handles.push(handle);
        }
        let mut pool = ReactorPool::new(handles);
        assert_eq!(pool.len(), 4);

        let mut clients = Vec::new();
        for i in 0..11 {
            let (server, client) = socket_pair();
            clients.push(client);
            assert_eq!(pool.dispatch(server).unwrap(), i % 4);
        }
        assert_eq!(pool.dispatched(), 11);
    }

    #[test]
    fn test_dispatch_to_stopped_worker() {
        let counter = SharedCounter::shared();
        let shutdown = Arc::new(AtomicBool::new(false));
        let config = Config::default();

        let reporter = Arc::new(DynReporter::boxed(std::io::sink()));
        let (worker, handle) = Worker::new(0, &config, counter, reporter, shutdown).unwrap();
        drop(worker);
        let mut pool = ReactorPool::new(vec![handle]);

        let (server, _client) = socket_pair();
        assert!(pool.dispatch(server).is_err());
        assert_eq!(pool.dispatched(), 1);
    }
}
