use std::fmt;

#[derive(PartialEq, Eq, PartialOrd, Ord, Hash, Copy, Clone, Debug)]
pub enum Severity {
    Warning,
    /// Recoverable: the stream can continue past it.
    Error,
    Fatal,
}

impl Severity {
    pub fn label(&self) -> &'static str {
        match self {
            Severity::Warning => "Warning",
            Severity::Error => "Error",
            Severity::Fatal => "Fatal error",
        }
    }
}

/// Where in which document a problem was found.
#[derive(PartialEq, Eq, Clone, Debug, Default)]
pub struct Location {
    pub system_id: Option<String>,
    /// 1-based
    pub line: Option<u32>,
    /// 1-based
    pub column: Option<u32>,
    /// Byte offset into the document text.
    pub offset: Option<usize>,
}

impl Location {
    pub fn new(system_id: Option<&str>, line: u32, column: u32) -> Location {
        Location {
            system_id: system_id.map(str::to_string),
            line: Some(line),
            column: Some(column),
            offset: None,
        }
    }

    pub fn with_offset(mut self, offset: usize) -> Location {
        self.offset = Some(offset);
        self
    }
}

#[derive(PartialEq, Eq, Clone, Debug)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    pub location: Option<Location>,
    /// Set once a reporter has shown this diagnostic, so that it is not
    /// shown again as it unwinds.
    pub delivered: bool,
}

impl Diagnostic {
    pub fn new(severity: Severity, message: impl Into<String>) -> Diagnostic {
        Diagnostic {
            severity,
            message: message.into(),
            location: None,
            delivered: false,
        }
    }

    pub fn warning(message: impl Into<String>) -> Diagnostic {
        Diagnostic::new(Severity::Warning, message)
    }

    pub fn error(message: impl Into<String>) -> Diagnostic {
        Diagnostic::new(Severity::Error, message)
    }

    pub fn fatal(message: impl Into<String>) -> Diagnostic {
        Diagnostic::new(Severity::Fatal, message)
    }

    pub fn at(mut self, location: Location) -> Diagnostic {
        self.location = Some(location);
        self
    }

    pub fn is_fatal(&self) -> bool {
        self.severity == Severity::Fatal
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.severity.label(), format_location(self))
    }
}

impl std::error::Error for Diagnostic {}

/// The message qualified by its location, if it has one.
///
/// `"<message> on line <n> column <m> of <system-id>:"`; parts of the
/// location that are unknown are left out.
pub fn format_location(diagnostic: &Diagnostic) -> String {
    let Some(loc) = &diagnostic.location else {
        return diagnostic.message.clone();
    };
    if loc.line.is_none() && loc.system_id.is_none() {
        return diagnostic.message.clone();
    }
    let mut s = diagnostic.message.clone();
    if let Some(line) = loc.line {
        s.push_str(&format!(" on line {line}"));
        if let Some(column) = loc.column {
            s.push_str(&format!(" column {column}"));
        }
    }
    if let Some(ref system_id) = loc.system_id {
        s.push_str(&format!(" of {system_id}"));
    }
    s.push(':');
    s
}

pub const WRAP_WIDTH: usize = 80;

/// Break `text` into lines no longer than `width`, at spaces only.
///
/// A single word longer than `width` gets a line to itself. Existing line
/// breaks are kept.
pub fn wrap(text: &str, width: usize) -> String {
    let mut out = String::with_capacity(text.len());
    for (i, line) in text.split('\n').enumerate() {
        if i > 0 {
            out.push('\n');
        }
        let mut col = 0;
        for word in line.split(' ').filter(|w| !w.is_empty()) {
            let len = word.chars().count();
            if col > 0 && col + 1 + len > width {
                out.push('\n');
                col = 0;
            } else if col > 0 {
                out.push(' ');
                col += 1;
            }
            out.push_str(word);
            col += len;
        }
    }
    out
}
