//! In-process distributed runtime.
//!
//! A [`Cluster`] launches a fixed set of workers, one OS thread each, and
//! hands every worker a [`Communicator`]: its rank, the world size and the
//! channels to its peers. Workers only talk through collectives
//! ([`Communicator::broadcast`], [`Communicator::all_gather`],
//! [`Communicator::all_gather_rows`]); there is no point-to-point API.
//!
//! Every collective carries a sequence number. A worker that runs ahead into
//! the next collective cannot have its message confused with the current
//! one: early arrivals are parked until the matching collective asks for
//! them.
//!
//! When a worker fails, it broadcasts an abort notice before exiting, so
//! peers blocked in (or later entering) a collective return
//! [`MatmulError::Aborted`] instead of waiting forever.

use std::any::Any;
use std::collections::HashMap;
use std::ops::Range;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::thread;

use tracing::{debug, warn};

use crate::error::{communication_error, configuration_error, MatmulError, Result};
use crate::matrix::Matrix;

/// Rank of the coordinating worker.
pub const ROOT: usize = 0;

/// Contiguous split of `rows` rows over `workers` workers.
///
/// Worker `r` owns `rows / workers` rows, plus one if `r < rows % workers`,
/// starting at `r * (rows / workers) + min(r, rows % workers)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowPartition {
    rows: usize,
    workers: usize,
}

impl RowPartition {
    /// Fails with a configuration error when `workers` is zero.
    pub fn new(rows: usize, workers: usize) -> Result<Self> {
        if workers == 0 {
            return Err(configuration_error("a partition needs at least one worker"));
        }
        Ok(Self { rows, workers })
    }

    /// Total number of rows split.
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Number of workers sharing the rows.
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Number of rows owned by `rank`.
    pub fn count(&self, rank: usize) -> usize {
        let base = self.rows / self.workers;
        let remainder = self.rows % self.workers;
        base + usize::from(rank < remainder)
    }

    /// First row owned by `rank`.
    pub fn offset(&self, rank: usize) -> usize {
        let base = self.rows / self.workers;
        let remainder = self.rows % self.workers;
        rank * base + rank.min(remainder)
    }

    /// Rows owned by `rank`, possibly empty.
    pub fn range(&self, rank: usize) -> Range<usize> {
        let offset = self.offset(rank);
        offset..offset + self.count(rank)
    }
}

type Payload = Box<dyn Any + Send>;

enum Message {
    Data(Payload),
    Abort(String),
}

struct Envelope {
    seq: u64,
    source: usize,
    message: Message,
}

/// A worker's view of the cluster.
///
/// Carried explicitly through every distributed call; nothing about the
/// worker's identity lives in global state.
pub struct Communicator {
    rank: usize,
    size: usize,
    // `None` at our own rank so that the inbox disconnects once every peer
    // is gone.
    peers: Vec<Option<Sender<Envelope>>>,
    inbox: Receiver<Envelope>,
    parked: HashMap<(u64, usize), Payload>,
    next_seq: u64,
    aborted: Option<(usize, String)>,
}

impl Communicator {
    /// This worker's rank, in `0..size()`.
    pub fn rank(&self) -> usize {
        self.rank
    }

    /// Number of workers in the cluster.
    pub fn size(&self) -> usize {
        self.size
    }

    /// True on rank [`ROOT`].
    pub fn is_root(&self) -> bool {
        self.rank == ROOT
    }

    fn begin_collective(&mut self) -> Result<u64> {
        if let Some((origin, reason)) = &self.aborted {
            return Err(MatmulError::Aborted {
                rank: self.rank,
                origin: *origin,
                reason: reason.clone(),
            });
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        Ok(seq)
    }

    fn send(&mut self, dest: usize, seq: u64, payload: Payload) -> Result<()> {
        let sender = self.peers[dest]
            .as_ref()
            .ok_or_else(|| communication_error(self.rank, "cannot send to self"))?;
        let envelope = Envelope {
            seq,
            source: self.rank,
            message: Message::Data(payload),
        };
        if sender.send(envelope).is_ok() {
            return Ok(());
        }
        // A peer that failed sends its abort before dropping its inbox, so
        // the notice is already queued here.
        self.drain_pending_abort()?;
        Err(communication_error(
            self.rank,
            format!("worker {dest} has exited"),
        ))
    }

    fn drain_pending_abort(&mut self) -> Result<()> {
        while let Ok(envelope) = self.inbox.try_recv() {
            self.accept(envelope)?;
        }
        Ok(())
    }

    fn accept(&mut self, envelope: Envelope) -> Result<()> {
        match envelope.message {
            Message::Data(payload) => {
                self.parked.insert((envelope.seq, envelope.source), payload);
                Ok(())
            }
            Message::Abort(reason) => {
                warn!(
                    rank = self.rank,
                    origin = envelope.source,
                    "received abort: {reason}"
                );
                self.aborted = Some((envelope.source, reason.clone()));
                Err(MatmulError::Aborted {
                    rank: self.rank,
                    origin: envelope.source,
                    reason,
                })
            }
        }
    }

    fn receive(&mut self, source: usize, seq: u64) -> Result<Payload> {
        loop {
            if let Some(payload) = self.parked.remove(&(seq, source)) {
                return Ok(payload);
            }
            let envelope = self.inbox.recv().map_err(|_| {
                communication_error(
                    self.rank,
                    format!("all peers exited while waiting on worker {source}"),
                )
            })?;
            self.accept(envelope)?;
        }
    }

    fn downcast<T: 'static>(&self, payload: Payload, source: usize) -> Result<T> {
        payload.downcast::<T>().map(|boxed| *boxed).map_err(|_| {
            communication_error(
                self.rank,
                format!("worker {source} sent a payload of an unexpected type"),
            )
        })
    }

    /// Distributes `value` from `root` to every worker.
    ///
    /// The root must pass `Some`; the other workers' argument is ignored and
    /// may be `None`.
    pub fn broadcast<T>(&mut self, root: usize, value: Option<T>) -> Result<T>
    where
        T: Clone + Send + 'static,
    {
        if root >= self.size {
            return Err(configuration_error(format!(
                "broadcast root {root} is outside a world of {}",
                self.size
            )));
        }
        let seq = self.begin_collective()?;

        if self.rank == root {
            let value = value.ok_or_else(|| {
                configuration_error("the broadcast root must supply a value")
            })?;
            for dest in (0..self.size).filter(|&r| r != root) {
                self.send(dest, seq, Box::new(value.clone()))?;
            }
            debug!(rank = self.rank, seq, "broadcast sent");
            Ok(value)
        } else {
            let payload = self.receive(root, seq)?;
            debug!(rank = self.rank, seq, root, "broadcast received");
            self.downcast(payload, root)
        }
    }

    /// Every worker contributes one value; every worker receives all of
    /// them, indexed by rank.
    pub fn all_gather<T>(&mut self, value: T) -> Result<Vec<Arc<T>>>
    where
        T: Send + Sync + 'static,
    {
        let seq = self.begin_collective()?;
        let mine = Arc::new(value);
        let me = self.rank;

        for dest in (0..self.size).filter(|&r| r != me) {
            self.send(dest, seq, Box::new(Arc::clone(&mine)))?;
        }

        let mut gathered = Vec::with_capacity(self.size);
        for source in 0..self.size {
            if source == self.rank {
                gathered.push(Arc::clone(&mine));
            } else {
                let payload = self.receive(source, seq)?;
                gathered.push(self.downcast::<Arc<T>>(payload, source)?);
            }
        }
        debug!(rank = self.rank, seq, "all-gather complete");
        Ok(gathered)
    }

    /// Concatenates every worker's row slice, in rank order, into the full
    /// matrix. `local` must hold exactly the rows `partition` assigns to
    /// this worker.
    pub fn all_gather_rows(&mut self, local: Matrix, partition: &RowPartition) -> Result<Matrix> {
        if partition.workers() != self.size {
            return Err(configuration_error(format!(
                "partition over {} workers used in a world of {}",
                partition.workers(),
                self.size
            )));
        }
        if local.rows() != partition.count(self.rank) {
            return Err(communication_error(
                self.rank,
                format!(
                    "contributed {} rows but the partition assigns {}",
                    local.rows(),
                    partition.count(self.rank)
                ),
            ));
        }

        let cols = local.cols();
        let slices = self.all_gather(local)?;
        let mut full = Matrix::new(partition.rows(), cols);
        for (rank, slice) in slices.iter().enumerate() {
            if slice.shape() != (partition.count(rank), cols) {
                return Err(communication_error(
                    self.rank,
                    format!(
                        "worker {rank} contributed a {}x{} slice, expected {}x{cols}",
                        slice.rows(),
                        slice.cols(),
                        partition.count(rank)
                    ),
                ));
            }
            full.set_submatrix(partition.offset(rank), 0, slice)?;
        }
        Ok(full)
    }

    /// Tells every peer that this worker failed. Peers that already exited
    /// are skipped.
    pub fn abort(&mut self, reason: &str) {
        if self.aborted.is_some() {
            return;
        }
        warn!(rank = self.rank, "aborting run: {reason}");
        self.aborted = Some((self.rank, reason.to_string()));
        for sender in self.peers.iter().flatten() {
            let _ = sender.send(Envelope {
                seq: u64::MAX,
                source: self.rank,
                message: Message::Abort(reason.to_string()),
            });
        }
    }
}

impl Drop for Communicator {
    fn drop(&mut self) {
        if thread::panicking() {
            self.abort("worker panicked");
        }
    }
}

/// Fixed-membership group of workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cluster {
    workers: usize,
}

impl Cluster {
    pub fn new(workers: usize) -> Result<Self> {
        if workers == 0 {
            return Err(configuration_error("a cluster needs at least one worker"));
        }
        Ok(Self { workers })
    }

    /// A cluster of one worker.
    pub fn single() -> Self {
        Self { workers: 1 }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    fn communicators(&self) -> Vec<Communicator> {
        let (senders, inboxes): (Vec<_>, Vec<_>) =
            (0..self.workers).map(|_| channel::<Envelope>()).unzip();

        inboxes
            .into_iter()
            .enumerate()
            .map(|(rank, inbox)| Communicator {
                rank,
                size: self.workers,
                peers: senders
                    .iter()
                    .enumerate()
                    .map(|(peer, sender)| (peer != rank).then(|| sender.clone()))
                    .collect(),
                inbox,
                parked: HashMap::new(),
                next_seq: 0,
                aborted: None,
            })
            .collect()
    }

    /// Runs `worker` once per rank and waits for all of them.
    ///
    /// Returns the per-rank results in rank order. If any worker fails, the
    /// others are aborted and the error of the worker that failed first in
    /// its own right (rather than by receiving an abort) is returned.
    pub fn launch<F, R>(&self, worker: F) -> Result<Vec<R>>
    where
        F: Fn(&mut Communicator) -> Result<R> + Sync,
        R: Send,
    {
        debug!(workers = self.workers, "launching workers");
        let worker = &worker;
        let communicators = self.communicators();

        let outcomes: Vec<Result<R>> = thread::scope(|scope| {
            let handles: Vec<_> = communicators
                .into_iter()
                .map(|mut comm| {
                    scope.spawn(move || {
                        let outcome = worker(&mut comm);
                        if let Err(error) = &outcome {
                            comm.abort(&error.to_string());
                        }
                        outcome
                    })
                })
                .collect();

            handles
                .into_iter()
                .enumerate()
                .map(|(rank, handle)| {
                    handle
                        .join()
                        .unwrap_or_else(|_| Err(communication_error(rank, "worker panicked")))
                })
                .collect()
        });

        let mut results = Vec::with_capacity(outcomes.len());
        let mut first_abort = None;
        let mut first_failure = None;
        for outcome in outcomes {
            match outcome {
                Ok(value) => results.push(value),
                Err(error @ MatmulError::Aborted { .. }) => {
                    first_abort.get_or_insert(error);
                }
                Err(error) => {
                    first_failure.get_or_insert(error);
                }
            }
        }
        match first_failure.or(first_abort) {
            Some(error) => Err(error),
            None => Ok(results),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_even() {
        let p = RowPartition::new(12, 4).unwrap();
        for rank in 0..4 {
            assert_eq!(p.count(rank), 3);
            assert_eq!(p.offset(rank), rank * 3);
        }
    }

    #[test]
    fn test_partition_remainder_goes_to_low_ranks() {
        let p = RowPartition::new(10, 4).unwrap();
        let counts: Vec<_> = (0..4).map(|r| p.count(r)).collect();
        let offsets: Vec<_> = (0..4).map(|r| p.offset(r)).collect();
        assert_eq!(counts, vec![3, 3, 2, 2]);
        assert_eq!(offsets, vec![0, 3, 6, 8]);
        assert_eq!(p.range(3), 8..10);
    }

    #[test]
    fn test_partition_more_workers_than_rows() {
        let p = RowPartition::new(2, 5).unwrap();
        let counts: Vec<_> = (0..5).map(|r| p.count(r)).collect();
        assert_eq!(counts, vec![1, 1, 0, 0, 0]);
        assert_eq!(p.offset(4), 2);
    }

    #[test]
    fn test_partition_rejects_zero_workers() {
        let error = RowPartition::new(4, 0).unwrap_err();
        assert!(error.is_configuration());
        assert!(RowPartition::new(0, 1).is_ok());
    }

    #[test]
    fn test_cluster_rejects_zero_workers() {
        assert!(Cluster::new(0).is_err());
    }

    #[test]
    fn test_broadcast_reaches_every_worker() {
        let cluster = Cluster::new(4).unwrap();
        let values = cluster
            .launch(|comm| {
                let value = comm.is_root().then(|| String::from("hello"));
                comm.broadcast(ROOT, value)
            })
            .unwrap();
        assert_eq!(values, vec!["hello"; 4]);
    }

    #[test]
    fn test_all_gather_is_rank_ordered() {
        let cluster = Cluster::new(5).unwrap();
        let gathered = cluster
            .launch(|comm| {
                let all = comm.all_gather(comm.rank() * 10)?;
                Ok(all.iter().map(|v| **v).collect::<Vec<_>>())
            })
            .unwrap();
        for per_rank in gathered {
            assert_eq!(per_rank, vec![0, 10, 20, 30, 40]);
        }
    }

    #[test]
    fn test_back_to_back_collectives_do_not_mix() {
        let cluster = Cluster::new(3).unwrap();
        let results = cluster
            .launch(|comm| {
                let first = comm.all_gather(comm.rank())?;
                let second = comm.all_gather(comm.rank() + 100)?;
                let third = comm.broadcast(2, (comm.rank() == 2).then_some(7u32))?;
                Ok((
                    first.iter().map(|v| **v).sum::<usize>(),
                    second.iter().map(|v| **v).sum::<usize>(),
                    third,
                ))
            })
            .unwrap();
        assert!(results.iter().all(|r| *r == (3, 303, 7)));
    }

    #[test]
    fn test_all_gather_rows_assembles_matrix() {
        let cluster = Cluster::new(3).unwrap();
        let full = Matrix::from_fn(7, 2, |i, j| (i * 2 + j) as f64);
        let results = cluster
            .launch(|comm| {
                let partition = RowPartition::new(full.rows(), comm.size())?;
                let range = partition.range(comm.rank());
                let local = full.row_block(range.start, range.len())?;
                comm.all_gather_rows(local, &partition)
            })
            .unwrap();
        for gathered in results {
            assert_eq!(gathered, full);
        }
    }

    #[test]
    fn test_failure_aborts_peers() {
        let cluster = Cluster::new(4).unwrap();
        let result = cluster.launch(|comm| {
            if comm.rank() == 2 {
                return Err(configuration_error("bad input on worker 2"));
            }
            comm.all_gather(comm.rank())?;
            Ok(())
        });
        match result {
            Err(MatmulError::Configuration { message }) => {
                assert!(message.contains("worker 2"));
            }
            other => panic!("expected the originating configuration error, got {other:?}"),
        }
    }

    #[test]
    fn test_root_failure_aborts_broadcast_receivers() {
        let cluster = Cluster::new(3).unwrap();
        let result = cluster.launch(|comm| {
            if comm.is_root() {
                return Err(configuration_error("root rejected input"));
            }
            comm.broadcast::<u8>(ROOT, None)
        });
        assert!(result.unwrap_err().is_configuration());
    }

    #[test]
    fn test_broadcast_root_must_supply_value() {
        let cluster = Cluster::single();
        let result = cluster.launch(|comm| comm.broadcast::<u8>(ROOT, None));
        assert!(result.is_err());
    }
}
