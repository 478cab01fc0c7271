//! Showing a diagnostic against the text it refers to.

use xmlfetch_model::{Diagnostic, Severity};

/// Build a code map holding `source` under `name`, and the
/// codemap-diagnostic messages pointing into it.
///
/// Without a byte offset the message is produced with no span.
pub fn diagnostic(
    name: String,
    source: String,
    err: &Diagnostic,
) -> (codemap::CodeMap, Vec<codemap_diagnostic::Diagnostic>) {
    let mut map = codemap::CodeMap::new();
    let len = source.len();
    let file = map.add_file(name, source);
    let mut spans = vec![];
    if let Some(offset) = err.location.as_ref().and_then(|l| l.offset) {
        let offset = offset.min(len) as u64;
        spans.push(codemap_diagnostic::SpanLabel {
            span: file.span.subspan(offset, offset),
            label: None,
            style: codemap_diagnostic::SpanStyle::Primary,
        });
    }
    let level = match err.severity {
        Severity::Warning => codemap_diagnostic::Level::Warning,
        Severity::Error | Severity::Fatal => codemap_diagnostic::Level::Error,
    };
    let diagnostics = vec![codemap_diagnostic::Diagnostic {
        level,
        message: err.message.clone(),
        code: None,
        spans,
    }];
    (map, diagnostics)
}

#[cfg(test)]
mod tests {
    use super::*;
    use xmlfetch_model::Location;

    #[test]
    fn span_at_offset() {
        let err = Diagnostic::fatal("boom").at(Location::new(Some("t.xml"), 2, 3).with_offset(6));
        let (map, d) = diagnostic("t.xml".to_string(), "<a>\n  <b></a>".to_string(), &err);
        assert_eq!(d.len(), 1);
        assert_eq!(d[0].message, "boom");
        let loc = map.look_up_pos(d[0].spans[0].span.low());
        assert_eq!(loc.position.line, 1);
        assert_eq!(loc.position.column, 2);
    }

    #[test]
    fn offset_past_end_is_clamped() {
        let err = Diagnostic::fatal("eof").at(Location::default().with_offset(99));
        let (_, d) = diagnostic("t.xml".to_string(), "<a>".to_string(), &err);
        assert_eq!(d[0].spans.len(), 1);
    }

    #[test]
    fn no_offset_no_span() {
        let (_, d) = diagnostic("t.xml".to_string(), "<a/>".to_string(), &Diagnostic::warning("w"));
        assert!(d[0].spans.is_empty());
        assert!(matches!(d[0].level, codemap_diagnostic::Level::Warning));
    }
}
