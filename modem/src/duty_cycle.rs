//! One transmission cycle of the logger.
//!
//! Records are queued in a [`Backlog`] as they are measured. Once per
//! transmission interval [`transmit_backlog`] wakes the modem, sends as much
//! of the backlog as the network takes and puts the modem back to stand-by.
//! Whatever could not be sent stays queued for the next cycle.

use heapless::{Deque, Vec};
use log::{debug, info, warn};

use crate::capability::ModemCapability;
use crate::clock::MillisClock;
use crate::controller::ModemController;
use crate::pins::{InputLine, OutputLine};

/// Largest encoded record.
pub const MAX_RECORD_LEN: usize = 64;

/// One encoded record.
pub type Record = Vec<u8, MAX_RECORD_LEN>;

/// Bounded FIFO of records waiting for transmission.
///
/// When full, the oldest record is dropped to make room for a new one.
pub struct Backlog<const N: usize> {
    records: Deque<Record, N>,
    dropped: u32,
}

impl<const N: usize> Backlog<N> {
    pub const fn new() -> Self {
        Self {
            records: Deque::new(),
            dropped: 0,
        }
    }

    /// Queue a record, dropping the oldest one if the backlog is full.
    pub fn push(&mut self, record: Record) {
        if self.records.is_full() {
            self.records.pop_front();
            self.dropped = self.dropped.saturating_add(1);
            warn!("Backlog full, dropped oldest record ({} so far)", self.dropped);
        }
        if self.records.push_back(record).is_err() {
            // Only happens for a zero capacity backlog
            self.dropped = self.dropped.saturating_add(1);
        }
    }

    /// Queue a copy of `bytes`. Returns `false` if they do not fit into a
    /// record.
    pub fn push_slice(&mut self, bytes: &[u8]) -> bool {
        match Record::from_slice(bytes) {
            Ok(record) => {
                self.push(record);
                true
            }
            Err(()) => false,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of records lost to overflow since boot.
    pub fn dropped(&self) -> u32 {
        self.dropped
    }

    /// Oldest record.
    pub fn front(&self) -> Option<&Record> {
        self.records.front()
    }

    pub fn pop_front(&mut self) -> Option<Record> {
        self.records.pop_front()
    }
}

impl<const N: usize> Default for Backlog<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of one transmission cycle.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Nothing was queued, the modem was left alone.
    Idle,
    /// The modem could not be woken.
    ModemUnavailable,
    /// The modem is awake, but has no network connection.
    NoConnection,
    /// `sent` records were sent, `remaining` are still queued.
    Sent { sent: usize, remaining: usize },
}

impl CycleOutcome {
    /// Whether the cycle was skipped because of the modem or network.
    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::ModemUnavailable | Self::NoConnection)
    }
}

/// Wake the modem, send the backlog oldest first and return the modem to
/// stand-by.
///
/// `send` transmits one record through the capability and returns whether
/// it was accepted. Sending stops at the first rejected record.
pub fn transmit_backlog<C, K, O, I, const N: usize>(
    controller: &mut ModemController<C, K, O, I>,
    backlog: &mut Backlog<N>,
    mut send: impl FnMut(&mut C, &[u8]) -> bool,
) -> CycleOutcome
where
    C: ModemCapability,
    K: MillisClock,
    O: OutputLine,
    I: InputLine,
{
    if backlog.is_empty() {
        debug!("Backlog empty, not waking the modem");
        return CycleOutcome::Idle;
    }

    if !controller.wake() {
        warn!("Modem unavailable, keeping {} records", backlog.len());
        controller.stand_by();
        return CycleOutcome::ModemUnavailable;
    }

    if !controller.is_internet_reachable() {
        warn!("No network connection, keeping {} records", backlog.len());
        controller.stand_by();
        return CycleOutcome::NoConnection;
    }

    let mut sent = 0;
    while let Some(record) = backlog.front() {
        if !send(controller.capability_mut(), &record[..]) {
            warn!("Sending record failed");
            break;
        }
        backlog.pop_front();
        sent += 1;
    }
    info!("Sent {} records, {} remaining", sent, backlog.len());

    controller.update_diagnostics();
    controller.stand_by();
    CycleOutcome::Sent {
        sent,
        remaining: backlog.len(),
    }
}
