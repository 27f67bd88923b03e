/*!
 * Monitoring
 * Scheduler events, diagnostics capture, switch trace, histograms and tracing setup
 */

pub mod diagnostics;
pub mod events;
pub mod histogram;
pub mod trace;
mod tracer;

pub use diagnostics::{DiagContext, Diagnostics, DiagnosticsReporter, NoopDiagnostics};
pub use events::{EventQueue, EventSink, SchedEvent, SchedEventKind};
pub use histogram::{Histogram, HistogramSnapshot};
pub use trace::{SwitchTrace, TraceEntry};
pub use tracer::{init_tracing, span_operation, SwitchSpan};
