//! Markup events, the contracts for producing and filtering them, and the
//! policy applied to diagnostics raised along the way.

pub mod diagnostic;
pub mod event;
pub mod filter;
pub mod id_filter;
pub mod reporter;

pub use diagnostic::{Diagnostic, Location, Severity};
pub use event::{Attribute, AttributeType, Event, EventSink, EventSource, QName, Replay};
pub use filter::{EventFilter, FilterSink, Filtered, PassThrough};
pub use id_filter::{IdSubtreeFilter, wrap_with_id_filter};
pub use reporter::{
    DiagnosticSink, ErrorReporter, MemorySink, RecoveryPolicy, SharedReporter, StderrSink,
};
