//! Choosing a parser for fetched content.

use crate::dtd::DtdAttributeTypes;
use crate::fetch::DocumentInput;
use crate::stream::{XML_NS, XmlSource, line_col};
use crate::tree::PreParsed;
use xmlfetch_model::{AttributeType, Diagnostic, EventSource, Location, QName, SharedReporter};

/// Which attributes carry element IDs.
///
/// `xml:id` always does. Beyond that, an attribute is an ID when the
/// document's DTD declares it so, or when its lexical name is one of the
/// configured names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdRules {
    names: Vec<String>,
}

impl IdRules {
    pub fn new<I, S>(names: I) -> IdRules
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        IdRules {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn with_name(mut self, name: &str) -> IdRules {
        self.names.push(name.to_string());
        self
    }

    /// The type of `attribute` on the element whose lexical name is
    /// `element`.
    pub fn classify(
        &self,
        dtd: Option<&DtdAttributeTypes>,
        element: &str,
        attribute: &QName,
    ) -> AttributeType {
        if attribute.namespace_uri.as_deref() == Some(XML_NS) && attribute.local == "id" {
            return AttributeType::Id;
        }
        let lexical = attribute.lexical();
        if self.names.iter().any(|n| *n == lexical) {
            return AttributeType::Id;
        }
        dtd.and_then(|d| d.attribute_type(element, &lexical))
            .unwrap_or_default()
    }
}

pub trait ParserFactory {
    /// Start producing events for `input`.
    ///
    /// Recoverable problems go to `reporter`; an `Err` here, or from the
    /// returned source, is fatal.
    fn open<'a>(
        &self,
        input: &'a DocumentInput,
        system_id: &str,
        reporter: SharedReporter,
    ) -> Result<Box<dyn EventSource + 'a>, Diagnostic>;
}

/// Tokenizes the document as events are pulled.
#[derive(Debug, Clone, Default)]
pub struct StreamingParserFactory {
    id_rules: IdRules,
}

impl StreamingParserFactory {
    pub fn new(id_rules: IdRules) -> StreamingParserFactory {
        StreamingParserFactory { id_rules }
    }
}

impl ParserFactory for StreamingParserFactory {
    fn open<'a>(
        &self,
        input: &'a DocumentInput,
        system_id: &str,
        reporter: SharedReporter,
    ) -> Result<Box<dyn EventSource + 'a>, Diagnostic> {
        let text = match input {
            DocumentInput::Bytes(bytes) => decode(bytes, system_id, &reporter)?,
            DocumentInput::Text(text) => text.strip_prefix('\u{feff}').unwrap_or(text),
            DocumentInput::Tree(tree) => return Ok(Box::new(tree.replay())),
        };
        Ok(Box::new(XmlSource::new(
            text,
            system_id,
            reporter,
            self.id_rules.clone(),
        )))
    }
}

/// Builds the whole document with roxmltree before the first event is
/// produced.
#[derive(Debug, Clone, Default)]
pub struct TreeParserFactory {
    id_rules: IdRules,
}

impl TreeParserFactory {
    pub fn new(id_rules: IdRules) -> TreeParserFactory {
        TreeParserFactory { id_rules }
    }
}

impl ParserFactory for TreeParserFactory {
    fn open<'a>(
        &self,
        input: &'a DocumentInput,
        system_id: &str,
        reporter: SharedReporter,
    ) -> Result<Box<dyn EventSource + 'a>, Diagnostic> {
        let text = match input {
            DocumentInput::Bytes(bytes) => decode(bytes, system_id, &reporter)?,
            DocumentInput::Text(text) => text.strip_prefix('\u{feff}').unwrap_or(text),
            DocumentInput::Tree(tree) => return Ok(Box::new(tree.replay())),
        };
        match PreParsed::parse(text, system_id, &self.id_rules) {
            Ok(tree) => Ok(Box::new(tree.into_source())),
            Err(diagnostic) => Err(fail(&reporter, diagnostic)),
        }
    }
}

fn fail(reporter: &SharedReporter, diagnostic: Diagnostic) -> Diagnostic {
    match reporter.borrow_mut().report(diagnostic.clone()) {
        Err(reported) => reported,
        Ok(()) => diagnostic,
    }
}

/// Only UTF-8 is read. A leading byte order mark is dropped.
fn decode<'a>(
    bytes: &'a [u8],
    system_id: &str,
    reporter: &SharedReporter,
) -> Result<&'a str, Diagnostic> {
    if bytes.starts_with(b"\xFF\xFE") || bytes.starts_with(b"\xFE\xFF") {
        let diagnostic = Diagnostic::fatal("UTF-16 documents are not supported")
            .at(Location::new(Some(system_id), 1, 1).with_offset(0));
        return Err(fail(reporter, diagnostic));
    }
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    std::str::from_utf8(bytes).map_err(|err| {
        let valid = err.valid_up_to();
        let prefix = std::str::from_utf8(&bytes[..valid]).unwrap_or_default();
        let (line, column) = line_col(prefix, valid);
        let diagnostic = Diagnostic::fatal("The document is not valid UTF-8")
            .at(Location::new(Some(system_id), line, column).with_offset(valid));
        fail(reporter, diagnostic)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use xmlfetch_model::{ErrorReporter, Event, MemorySink, RecoveryPolicy};

    fn reporter() -> SharedReporter {
        ErrorReporter::with_sink(RecoveryPolicy::Warn, MemorySink::new()).shared()
    }

    fn collect(factory: &dyn ParserFactory, input: &DocumentInput) -> Result<Vec<Event>, Diagnostic> {
        let mut out: Vec<Event> = vec![];
        factory
            .open(input, "urn:test", reporter())?
            .drain_into(&mut out)?;
        Ok(out)
    }

    #[test]
    fn classify() {
        let rules = IdRules::default().with_name("key");
        let dtd = DtdAttributeTypes::parse("<!ATTLIST e ref IDREF #IMPLIED code ID #IMPLIED>");
        assert_eq!(
            rules.classify(None, "e", &QName::new("xml", "id", Some(XML_NS))),
            AttributeType::Id
        );
        assert_eq!(rules.classify(None, "e", &QName::local("key")), AttributeType::Id);
        assert_eq!(rules.classify(None, "e", &QName::local("id")), AttributeType::Cdata);
        assert_eq!(
            rules.classify(Some(&dtd), "e", &QName::local("code")),
            AttributeType::Id
        );
        assert_eq!(
            rules.classify(Some(&dtd), "e", &QName::local("ref")),
            AttributeType::IdRef
        );
        assert_eq!(
            rules.classify(Some(&dtd), "other", &QName::local("code")),
            AttributeType::Cdata
        );
    }

    #[test]
    fn factories_agree() {
        let xml = "<?xml version='1.0'?>\n<!DOCTYPE r [<!ATTLIST p:s n ID #IMPLIED>]>\n\
                   <r xmlns:p='urn:p'><!--c--><p:s n='a'>x&amp;y</p:s><?t d?></r>";
        let input = DocumentInput::Text(xml.to_string());
        let streamed = collect(&StreamingParserFactory::default(), &input).unwrap();
        let tree = collect(&TreeParserFactory::default(), &input).unwrap();
        assert_eq!(streamed, tree);

        let xml = "<!DOCTYPE a [<!ENTITY me \"Me &amp; you\"><!ENTITY el \"<b/>\">]>\
                   <a>&me;|&el;</a>";
        let input = DocumentInput::Text(xml.to_string());
        let streamed = collect(&StreamingParserFactory::default(), &input).unwrap();
        let tree = collect(&TreeParserFactory::default(), &input).unwrap();
        assert_eq!(streamed, tree);
        assert_eq!(streamed[2], Event::Characters("Me & you|".to_string()));
        assert_eq!(streamed.len(), 7);
    }

    #[test]
    fn bytes_with_bom() {
        let input = DocumentInput::Bytes(b"\xEF\xBB\xBF<a/>".to_vec());
        let out = collect(&StreamingParserFactory::default(), &input).unwrap();
        assert_eq!(out.len(), 4);
    }

    #[test]
    fn bad_bytes() {
        let input = DocumentInput::Bytes(b"<a>\n\xC3\x28</a>".to_vec());
        let err = collect(&StreamingParserFactory::default(), &input).unwrap_err();
        let loc = err.location.unwrap();
        assert_eq!((loc.line, loc.column, loc.offset), (Some(2), Some(1), Some(4)));

        let input = DocumentInput::Bytes(b"\xFF\xFE<\x00a\x00/\x00>\x00".to_vec());
        assert_matches!(collect(&TreeParserFactory::default(), &input), Err(d) if d.is_fatal());
    }

    #[test]
    fn tree_input_is_replayed() {
        let tree = PreParsed::parse("<a><b/></a>", "urn:test", &IdRules::default()).unwrap();
        let expected = tree.events().to_vec();
        let input = DocumentInput::Tree(tree);
        assert_eq!(collect(&StreamingParserFactory::default(), &input).unwrap(), expected);
    }

    #[test]
    fn tree_parse_error_is_fatal() {
        let input = DocumentInput::Text("<a>\n<b></a>".to_string());
        let err = collect(&TreeParserFactory::default(), &input).unwrap_err();
        assert!(err.is_fatal());
        assert!(err.delivered);
        assert_eq!(err.location.unwrap().line, Some(2));
    }
}
