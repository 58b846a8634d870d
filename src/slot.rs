//! Worker slot pool.
//!
//! A fixed set of N slots bounds the number of deletes in flight. A slot is
//! taken before a delete is issued and handed back when the returned
//! [`SlotGuard`] is dropped, on success, failure and panic alike. Each slot
//! carries the connection it last used so consecutive deletes reuse it.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use anyhow::Result;
use async_channel::{Receiver, Sender};

use crate::protocol::connection::Connection;
use crate::types::error::RiakError;

/// One unit of delete concurrency.
#[derive(Debug)]
pub struct WorkerSlot {
    index: usize,
    connection: Option<Connection>,
}

impl WorkerSlot {
    pub fn index(&self) -> usize {
        self.index
    }

    /// The held connection, if it is still usable.
    pub fn live_connection(&mut self) -> Option<&mut Connection> {
        if self.connection.as_ref().is_some_and(Connection::is_closed) {
            self.connection = None;
        }
        self.connection.as_mut()
    }

    pub fn set_connection(&mut self, connection: Connection) -> &mut Connection {
        self.connection.insert(connection)
    }

    /// Forget the held connection, e.g. after a transport error.
    pub fn clear_connection(&mut self) {
        self.connection = None;
    }

    pub fn has_connection(&self) -> bool {
        self.connection.is_some()
    }
}

#[derive(Debug)]
struct PoolCounters {
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    uses: Vec<AtomicU64>,
}

/// Bounded pool of [`WorkerSlot`]s. Cheap to clone; clones share the slots.
#[derive(Debug, Clone)]
pub struct WorkerSlotPool {
    sender: Sender<WorkerSlot>,
    receiver: Receiver<WorkerSlot>,
    counters: Arc<PoolCounters>,
}

impl WorkerSlotPool {
    /// Create a pool with `capacity` slots. A capacity of zero is rejected.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(RiakError::InvalidConfig("worker slot count must be at least 1".to_string()).into());
        }

        let (sender, receiver) = async_channel::bounded(capacity);
        for index in 0..capacity {
            sender
                .try_send(WorkerSlot {
                    index,
                    connection: None,
                })
                .map_err(|e| RiakError::InvalidConfig(format!("slot pool setup: {e}")))?;
        }

        Ok(Self {
            sender,
            receiver,
            counters: Arc::new(PoolCounters {
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
                uses: (0..capacity).map(|_| AtomicU64::new(0)).collect(),
            }),
        })
    }

    /// Wait for a free slot. Fails with [`RiakError::Cancelled`] once the
    /// pool is closed.
    pub async fn acquire(&self) -> Result<SlotGuard> {
        let slot = self
            .receiver
            .recv()
            .await
            .map_err(|_| RiakError::Cancelled)?;

        let in_flight = self.counters.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters
            .max_in_flight
            .fetch_max(in_flight, Ordering::SeqCst);
        if let Some(uses) = self.counters.uses.get(slot.index) {
            uses.fetch_add(1, Ordering::SeqCst);
        }

        Ok(SlotGuard {
            slot: Some(slot),
            sender: self.sender.clone(),
            counters: self.counters.clone(),
        })
    }

    /// Wake every waiter in [`WorkerSlotPool::acquire`] with an error.
    pub fn close(&self) {
        self.receiver.close();
    }

    pub fn capacity(&self) -> usize {
        self.counters.uses.len()
    }

    /// Slots currently free.
    pub fn available(&self) -> usize {
        self.receiver.len()
    }

    pub fn in_flight(&self) -> usize {
        self.counters.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of slots ever held at once.
    pub fn max_in_flight(&self) -> usize {
        self.counters.max_in_flight.load(Ordering::SeqCst)
    }

    /// How many times each slot was handed out, by slot index.
    pub fn uses_per_slot(&self) -> Vec<u64> {
        self.counters
            .uses
            .iter()
            .map(|u| u.load(Ordering::SeqCst))
            .collect()
    }
}

/// A held slot. Dropping it returns the slot to the pool.
#[derive(Debug)]
pub struct SlotGuard {
    slot: Option<WorkerSlot>,
    sender: Sender<WorkerSlot>,
    counters: Arc<PoolCounters>,
}

impl Deref for SlotGuard {
    type Target = WorkerSlot;

    fn deref(&self) -> &WorkerSlot {
        // Only `drop` takes the slot out.
        self.slot.as_ref().unwrap_or_else(|| unreachable!())
    }
}

impl DerefMut for SlotGuard {
    fn deref_mut(&mut self) -> &mut WorkerSlot {
        self.slot.as_mut().unwrap_or_else(|| unreachable!())
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            self.counters.in_flight.fetch_sub(1, Ordering::SeqCst);
            // The channel holds exactly `capacity` slots, so this only fails
            // once the pool was closed.
            let _ = self.sender.try_send(slot);
        }
    }
}
