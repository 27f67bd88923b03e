/*!
 * Scheduler Events
 * Recovery and diagnostic events posted to the external event handler
 */

use crate::core::types::{fn_name, FunctionId, InlineString, SchedBlock};
use log::warn;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Event kinds the scheduler can raise, with their wire ids
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u32)]
pub enum SchedEventKind {
    /// Reset a VF unconditionally
    ForceResetVf = 0xff01,
    /// A world switch failed while this function was resident
    SchedResetVf = 0xff02,
    /// The hardware scheduler reported a hung function
    HwSchedResetVf = 0xff03,
    /// Collect a diagnostic data dump
    CollectDiagData = 0xff40,
    /// Recovery is impossible; retire the device
    SchedRma = 0xff66,
}

impl SchedEventKind {
    #[inline(always)]
    pub const fn id(self) -> u32 {
        self as u32
    }

    pub fn from_id(id: u32) -> Option<Self> {
        match id {
            0xff01 => Some(Self::ForceResetVf),
            0xff02 => Some(Self::SchedResetVf),
            0xff03 => Some(Self::HwSchedResetVf),
            0xff40 => Some(Self::CollectDiagData),
            0xff66 => Some(Self::SchedRma),
            _ => None,
        }
    }
}

impl fmt::Display for SchedEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ForceResetVf => "FORCE_RESET_VF",
            Self::SchedResetVf => "SCHED_RESET_VF",
            Self::HwSchedResetVf => "HW_SCHED_RESET_VF",
            Self::CollectDiagData => "COLLECT_DIAG_DATA",
            Self::SchedRma => "SCHED_RMA",
        };
        write!(f, "{}(0x{:x})", name, self.id())
    }
}

/// One event queued for the external handler
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedEvent {
    pub kind: SchedEventKind,
    pub function: FunctionId,
    pub block: SchedBlock,
    pub reason: Option<InlineString>,
}

impl SchedEvent {
    pub fn new(kind: SchedEventKind, function: FunctionId, block: SchedBlock) -> Self {
        Self {
            kind,
            function,
            block,
            reason: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<InlineString>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

impl fmt::Display for SchedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} on {}", self.kind, fn_name(self.function), self.block)?;
        if let Some(reason) = &self.reason {
            write!(f, ": {}", reason)?;
        }
        Ok(())
    }
}

/// Destination for scheduler events
pub trait EventSink: Send + Sync {
    fn post(&self, event: SchedEvent);
}

/// Unbounded MPMC event queue
///
/// Posting never blocks, so the world-switch worker can report failures while
/// holding its own lock. The receiving side is usable from threads and from async tasks.
#[derive(Clone)]
pub struct EventQueue {
    tx: flume::Sender<SchedEvent>,
    rx: flume::Receiver<SchedEvent>,
}

impl EventQueue {
    pub fn new() -> Self {
        let (tx, rx) = flume::unbounded();
        Self { tx, rx }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn try_recv(&self) -> Option<SchedEvent> {
        self.rx.try_recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<SchedEvent> {
        self.rx.recv_timeout(timeout).ok()
    }

    /// Wait for the next event from an async context
    pub async fn recv_async(&self) -> Option<SchedEvent> {
        self.rx.recv_async().await.ok()
    }

    /// Take everything queued so far
    pub fn drain(&self) -> Vec<SchedEvent> {
        self.rx.try_iter().collect()
    }

    /// Receiver handle for a dedicated consumer
    pub fn receiver(&self) -> flume::Receiver<SchedEvent> {
        self.rx.clone()
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for EventQueue {
    fn post(&self, event: SchedEvent) {
        warn!("Queue event {}", event);
        // The queue owns a receiver, so the channel cannot be disconnected here
        let _ = self.tx.send(event);
    }
}
