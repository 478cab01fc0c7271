//! Policy for diagnostics raised while a document is parsed.
//!
//! One [`ErrorReporter`] lives for one resolution session. Sources report
//! into it as they go; it decides what is shown, what is counted, and what
//! stops the stream.

use crate::diagnostic::{Diagnostic, Severity, WRAP_WIDTH, format_location, wrap};
use std::cell::RefCell;
use std::rc::Rc;
use std::str::FromStr;

/// Warnings shown before the rest are suppressed.
pub const MAX_WARNINGS: usize = 25;

pub const FLOOD_NOTICE: &str = "No more warnings will be shown";

#[derive(PartialEq, Eq, Copy, Clone, Debug, Default)]
pub enum RecoveryPolicy {
    /// Recoverable errors are dropped.
    Silent,
    /// Recoverable errors are shown and counted.
    #[default]
    Warn,
    /// The first recoverable error is treated as fatal.
    Strict,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown recovery policy {0:?} (expected silent, warn or strict)")]
pub struct UnknownPolicy(pub String);

impl FromStr for RecoveryPolicy {
    type Err = UnknownPolicy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "silent" => Ok(RecoveryPolicy::Silent),
            "warn" => Ok(RecoveryPolicy::Warn),
            "strict" => Ok(RecoveryPolicy::Strict),
            other => Err(UnknownPolicy(other.to_string())),
        }
    }
}

/// Where shown diagnostics end up.
pub trait DiagnosticSink {
    fn deliver(&mut self, diagnostic: &Diagnostic, rendered: &str);
}

pub struct StderrSink;

impl DiagnosticSink for StderrSink {
    fn deliver(&mut self, _diagnostic: &Diagnostic, rendered: &str) {
        eprintln!("{rendered}");
    }
}

/// Keeps delivered diagnostics in memory; clones share the same store.
#[derive(Clone, Default)]
pub struct MemorySink {
    delivered: Rc<RefCell<Vec<(Severity, String)>>>,
}

impl MemorySink {
    pub fn new() -> MemorySink {
        MemorySink::default()
    }

    pub fn messages(&self) -> Vec<String> {
        self.delivered
            .borrow()
            .iter()
            .map(|(_, msg)| msg.clone())
            .collect()
    }

    pub fn severities(&self) -> Vec<Severity> {
        self.delivered.borrow().iter().map(|(s, _)| *s).collect()
    }

    pub fn len(&self) -> usize {
        self.delivered.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.delivered.borrow().is_empty()
    }
}

impl DiagnosticSink for MemorySink {
    fn deliver(&mut self, diagnostic: &Diagnostic, rendered: &str) {
        self.delivered
            .borrow_mut()
            .push((diagnostic.severity, rendered.to_string()))
    }
}

pub type SharedReporter = Rc<RefCell<ErrorReporter>>;

pub struct ErrorReporter {
    policy: RecoveryPolicy,
    sink: Box<dyn DiagnosticSink>,
    warning_count: usize,
    error_count: usize,
    shown: usize,
    muted: bool,
    failed: bool,
}

impl Default for ErrorReporter {
    fn default() -> Self {
        ErrorReporter::new(RecoveryPolicy::default())
    }
}

impl ErrorReporter {
    pub fn new(policy: RecoveryPolicy) -> ErrorReporter {
        ErrorReporter::with_sink(policy, StderrSink)
    }

    pub fn with_sink(policy: RecoveryPolicy, sink: impl DiagnosticSink + 'static) -> ErrorReporter {
        ErrorReporter {
            policy,
            sink: Box::new(sink),
            warning_count: 0,
            error_count: 0,
            shown: 0,
            muted: false,
            failed: false,
        }
    }

    pub fn shared(self) -> SharedReporter {
        Rc::new(RefCell::new(self))
    }

    pub fn policy(&self) -> RecoveryPolicy {
        self.policy
    }

    pub fn warning_count(&self) -> usize {
        self.warning_count
    }

    pub fn error_count(&self) -> usize {
        self.error_count
    }

    pub fn has_failed(&self) -> bool {
        self.failed
    }

    /// Apply the policy to `diagnostic`.
    ///
    /// `Err` hands back the diagnostic, now fatal, which the caller must
    /// stop on. After the first fatal report every later one is fatal too.
    pub fn report(&mut self, mut diagnostic: Diagnostic) -> Result<(), Diagnostic> {
        if self.failed {
            diagnostic.severity = Severity::Fatal;
        }
        match diagnostic.severity {
            Severity::Fatal => self.fail(diagnostic),
            Severity::Error => {
                self.error_count += 1;
                match self.policy {
                    RecoveryPolicy::Strict => {
                        diagnostic.severity = Severity::Fatal;
                        self.fail(diagnostic)
                    }
                    RecoveryPolicy::Warn => {
                        self.show(&diagnostic);
                        Ok(())
                    }
                    RecoveryPolicy::Silent => Ok(()),
                }
            }
            Severity::Warning => {
                self.warning_count += 1;
                if self.policy != RecoveryPolicy::Silent {
                    self.show(&diagnostic);
                }
                Ok(())
            }
        }
    }

    fn fail(&mut self, mut diagnostic: Diagnostic) -> Result<(), Diagnostic> {
        self.failed = true;
        if !diagnostic.delivered {
            self.deliver(&diagnostic);
            diagnostic.delivered = true;
        }
        Err(diagnostic)
    }

    fn show(&mut self, diagnostic: &Diagnostic) {
        if self.muted {
            return;
        }
        self.deliver(diagnostic);
        self.shown += 1;
        if self.shown > MAX_WARNINGS {
            let notice = Diagnostic::warning(FLOOD_NOTICE);
            self.sink.deliver(&notice, FLOOD_NOTICE);
            self.muted = true;
            if self.policy == RecoveryPolicy::Warn {
                self.policy = RecoveryPolicy::Silent;
            }
        }
    }

    fn deliver(&mut self, diagnostic: &Diagnostic) {
        let text = format!(
            "{}: {}",
            diagnostic.severity.label(),
            format_location(diagnostic)
        );
        self.sink.deliver(diagnostic, &wrap(&text, WRAP_WIDTH));
    }
}
