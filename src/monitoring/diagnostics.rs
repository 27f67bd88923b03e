/*!
 * Diagnostics
 * GPU state dumps taken when hardware bring-up or an engine transition fails
 */

use super::events::{EventSink, SchedEvent, SchedEventKind};
use super::trace::TraceEntry;
use crate::core::types::{EngineId, FunctionId, InlineString, PF_IDX, SchedBlock};
use log::error;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// What failed, handed to the diagnostics sink
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagContext {
    pub engine: Option<EngineId>,
    pub function: FunctionId,
    pub block: SchedBlock,
    pub what: InlineString,
}

impl DiagContext {
    pub fn engine(engine: EngineId, block: SchedBlock, function: FunctionId, what: impl Into<InlineString>) -> Self {
        Self {
            engine: Some(engine),
            function,
            block,
            what: what.into(),
        }
    }

    pub fn hw_init(what: impl Into<InlineString>) -> Self {
        Self {
            engine: None,
            function: PF_IDX,
            block: SchedBlock::Gfx,
            what: what.into(),
        }
    }
}

/// Sink for GPU state dumps
pub trait Diagnostics: Send + Sync {
    /// `recent` holds the newest switch-trace entries, oldest first
    fn capture(&self, ctx: &DiagContext, recent: &[TraceEntry]);
}

/// Writes the dump to the log and asks the event handler to collect full data
pub struct DiagnosticsReporter {
    events: Arc<dyn EventSink>,
    captures: AtomicU64,
    last: Mutex<Option<DiagContext>>,
}

impl DiagnosticsReporter {
    pub fn new(events: Arc<dyn EventSink>) -> Self {
        Self {
            events,
            captures: AtomicU64::new(0),
            last: Mutex::new(None),
        }
    }

    pub fn captures(&self) -> u64 {
        self.captures.load(Ordering::Relaxed)
    }

    pub fn last(&self) -> Option<DiagContext> {
        self.last.lock().clone()
    }
}

impl Diagnostics for DiagnosticsReporter {
    fn capture(&self, ctx: &DiagContext, recent: &[TraceEntry]) {
        self.captures.fetch_add(1, Ordering::Relaxed);
        match ctx.engine {
            Some(engine) => error!("GPU state dump: engine {} ({}): {}", engine, ctx.block, ctx.what),
            None => error!("GPU state dump: {}", ctx.what),
        }
        for entry in recent {
            error!("  {}", entry);
        }
        *self.last.lock() = Some(ctx.clone());
        self.events.post(
            SchedEvent::new(SchedEventKind::CollectDiagData, ctx.function, ctx.block)
                .with_reason(ctx.what.clone()),
        );
    }
}

/// Discards every dump
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopDiagnostics;

impl Diagnostics for NoopDiagnostics {
    fn capture(&self, _ctx: &DiagContext, _recent: &[TraceEntry]) {}
}
