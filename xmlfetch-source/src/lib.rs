//! Turning a document reference into a stream of events.
//!
//! [`DocumentResolver`] absolutizes the reference, fetches the document and
//! hands back a [`ResolvedDocument`]; the events of that document, or of
//! the element named by the reference's fragment, are then pulled with
//! [`ResolvedDocument::events`] or pushed with
//! [`ResolvedDocument::stream_into`].

pub mod dtd;
pub mod factory;
pub mod fetch;
pub mod render;
pub mod stream;
pub mod tree;

pub use factory::{IdRules, ParserFactory, StreamingParserFactory, TreeParserFactory};
pub use fetch::{DocumentFetcher, DocumentInput, FetchError, FsFetcher, MemoryFetcher};
pub use stream::XmlSource;
pub use tree::PreParsed;

use std::str::FromStr;
use thiserror::Error;
use xmlfetch_model::{
    Diagnostic, ErrorReporter, EventSink, EventSource, SharedReporter, wrap_with_id_filter,
};
use xmlfetch_uri::{AbsoluteUri, UriError, absolutize, expand_against_working_dir, split_fragment};

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error(transparent)]
    Uri(#[from] UriError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("{0}")]
    Parse(Diagnostic),
    #[error("no element with ID {id:?} in {uri}")]
    IdNotFound { uri: String, id: String },
}

impl From<Diagnostic> for ResolveError {
    fn from(d: Diagnostic) -> Self {
        ResolveError::Parse(d)
    }
}

/// What to do when a fragment names an ID that no element carries.
#[derive(PartialEq, Eq, Copy, Clone, Debug, Default)]
pub enum MissingIdPolicy {
    Ignore,
    /// Report a warning and carry on with the (empty) result.
    #[default]
    Warn,
    Fail,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown missing-id policy {0:?} (expected ignore, warn or fail)")]
pub struct UnknownMissingIdPolicy(pub String);

impl FromStr for MissingIdPolicy {
    type Err = UnknownMissingIdPolicy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ignore" => Ok(MissingIdPolicy::Ignore),
            "warn" => Ok(MissingIdPolicy::Warn),
            "fail" => Ok(MissingIdPolicy::Fail),
            other => Err(UnknownMissingIdPolicy(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ResolverOptions {
    pub missing_id: MissingIdPolicy,
}

pub struct DocumentResolver<F, P> {
    fetcher: F,
    factory: P,
    options: ResolverOptions,
}

impl<F: DocumentFetcher, P: ParserFactory> DocumentResolver<F, P> {
    pub fn new(fetcher: F, factory: P, options: ResolverOptions) -> DocumentResolver<F, P> {
        DocumentResolver {
            fetcher,
            factory,
            options,
        }
    }

    /// Resolve `href` against `base`, reporting to a fresh reporter with the
    /// default policy.
    pub fn resolve(
        &self,
        href: &str,
        base: Option<&str>,
    ) -> Result<ResolvedDocument<'_, P>, ResolveError> {
        self.resolve_with_reporter(href, base, ErrorReporter::default().shared())
    }

    pub fn resolve_with_reporter(
        &self,
        href: &str,
        base: Option<&str>,
        reporter: SharedReporter,
    ) -> Result<ResolvedDocument<'_, P>, ResolveError> {
        let reference = split_fragment(href);
        let uri = absolute_uri(reference.uri, base)?;
        tracing::debug!(%uri, id = ?reference.id(), "resolved reference");
        let input = self.fetcher.fetch(&uri)?;
        Ok(ResolvedDocument {
            uri,
            id: reference.id().map(str::to_string),
            input,
            factory: &self.factory,
            reporter,
            missing_id: self.options.missing_id,
        })
    }
}

/// `absolutize`, retrying once with `base` expanded against the working
/// directory.
pub fn absolute_uri(relative: &str, base: Option<&str>) -> Result<AbsoluteUri, UriError> {
    match absolutize(relative, base) {
        Ok(uri) => Ok(uri),
        Err(err) => {
            let Some(base) = base else {
                return Err(err);
            };
            match expand_against_working_dir(base) {
                Some(expanded) if expanded != base => {
                    tracing::debug!(%base, %expanded, "retrying with expanded base");
                    absolutize(relative, Some(&expanded))
                }
                _ => Err(err),
            }
        }
    }
}

/// A fetched document, ready to be parsed.
pub struct ResolvedDocument<'r, P> {
    uri: AbsoluteUri,
    id: Option<String>,
    input: DocumentInput,
    factory: &'r P,
    reporter: SharedReporter,
    missing_id: MissingIdPolicy,
}

impl<P: ParserFactory> ResolvedDocument<'_, P> {
    pub fn uri(&self) -> &AbsoluteUri {
        &self.uri
    }

    /// The ID named by the reference's fragment.
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn input(&self) -> &DocumentInput {
        &self.input
    }

    pub fn reporter(&self) -> &SharedReporter {
        &self.reporter
    }

    /// The document's events, restricted to the identified element's
    /// subtree when there is an ID.
    pub fn events(&self) -> Result<Box<dyn EventSource + '_>, Diagnostic> {
        let source = self.open()?;
        match self.id() {
            Some(id) => Ok(Box::new(wrap_with_id_filter(source, id))),
            None => Ok(source),
        }
    }

    fn open(&self) -> Result<Box<dyn EventSource + '_>, Diagnostic> {
        self.factory
            .open(&self.input, self.uri.as_str(), self.reporter.clone())
    }

    /// Push every event into `sink`, returning how many there were.
    ///
    /// When an ID was asked for and no element carried it, the missing-id
    /// policy decides the outcome.
    pub fn stream_into(&self, sink: &mut dyn EventSink) -> Result<usize, ResolveError> {
        let source = self.open()?;
        let Some(id) = self.id() else {
            let mut source = source;
            return Ok(source.drain_into(sink)?);
        };
        let mut filtered = wrap_with_id_filter(source, id);
        let count = filtered.drain_into(sink)?;
        if filtered.filter().matched() {
            return Ok(count);
        }
        match self.missing_id {
            MissingIdPolicy::Ignore => Ok(count),
            MissingIdPolicy::Warn => {
                let warning = Diagnostic::warning(format!(
                    "No element with ID {id:?} in {}",
                    self.uri
                ));
                self.reporter.borrow_mut().report(warning)?;
                Ok(count)
            }
            MissingIdPolicy::Fail => Err(ResolveError::IdNotFound {
                uri: self.uri.to_string(),
                id: id.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use xmlfetch_model::{Event, MemorySink, QName, RecoveryPolicy, Severity};

    const DOC: &str = "<book xmlns:p='urn:p'><ch xml:id='one'><p:t>One</p:t></ch><ch xml:id='two'/></book>";

    fn resolver(missing_id: MissingIdPolicy) -> DocumentResolver<MemoryFetcher, StreamingParserFactory> {
        DocumentResolver::new(
            MemoryFetcher::new().with("http://example.com/docs/book.xml", DOC),
            StreamingParserFactory::default(),
            ResolverOptions { missing_id },
        )
    }

    fn names(events: &[Event]) -> Vec<String> {
        events
            .iter()
            .filter_map(|e| match e {
                Event::StartElement { name, .. } => Some(name.local.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn whole_document() {
        let r = resolver(MissingIdPolicy::Warn);
        let doc = r
            .resolve("book.xml", Some("http://example.com/docs/index.xml"))
            .unwrap();
        assert_eq!(doc.uri().as_str(), "http://example.com/docs/book.xml");
        assert_eq!(doc.id(), None);
        let mut out: Vec<Event> = vec![];
        let n = doc.stream_into(&mut out).unwrap();
        assert_eq!(n, out.len());
        assert_eq!(names(&out), vec!["book", "ch", "t", "ch"]);
    }

    #[test]
    fn fragment_selects_subtree() {
        let r = resolver(MissingIdPolicy::Warn);
        let doc = r
            .resolve("book.xml#one", Some("http://example.com/docs/index.xml"))
            .unwrap();
        assert_eq!(doc.id(), Some("one"));
        let mut out: Vec<Event> = vec![];
        doc.events().unwrap().drain_into(&mut out).unwrap();
        assert_eq!(
            out,
            vec![
                Event::StartDocument,
                Event::StartPrefixMapping {
                    prefix: "p".to_string(),
                    uri: "urn:p".to_string()
                },
                Event::StartElement {
                    name: QName::local("ch"),
                    attributes: vec![xmlfetch_model::Attribute::id(
                        QName::new("xml", "id", Some(stream::XML_NS)),
                        "one"
                    )],
                },
                Event::StartElement {
                    name: QName::new("p", "t", Some("urn:p")),
                    attributes: vec![],
                },
                Event::Characters("One".to_string()),
                Event::EndElement {
                    name: QName::new("p", "t", Some("urn:p")),
                },
                Event::EndElement {
                    name: QName::local("ch"),
                },
                Event::EndPrefixMapping {
                    prefix: "p".to_string()
                },
                Event::EndDocument,
            ]
        );
    }

    #[test]
    fn id_inside_entity_markup() {
        let text = "<!DOCTYPE book [<!ENTITY ch \"<ch xml:id='three'>Three</ch>\">]><book>&ch;</book>";
        let r = DocumentResolver::new(
            MemoryFetcher::new().with("http://example.com/e.xml", text),
            StreamingParserFactory::default(),
            ResolverOptions {
                missing_id: MissingIdPolicy::Fail,
            },
        );
        let doc = r.resolve("http://example.com/e.xml#three", None).unwrap();
        let mut out: Vec<Event> = vec![];
        doc.stream_into(&mut out).unwrap();
        assert_eq!(names(&out), vec!["ch"]);
        assert!(out.contains(&Event::Characters("Three".to_string())));
    }

    #[test]
    fn empty_fragment_is_whole_document() {
        let r = resolver(MissingIdPolicy::Fail);
        let doc = r.resolve("http://example.com/docs/book.xml#", None).unwrap();
        assert_eq!(doc.id(), None);
        let mut out: Vec<Event> = vec![];
        doc.stream_into(&mut out).unwrap();
        assert_eq!(names(&out).len(), 4);
    }

    #[test]
    fn missing_id_policies() {
        let href = "http://example.com/docs/book.xml#three";

        let r = resolver(MissingIdPolicy::Fail);
        let doc = r.resolve(href, None).unwrap();
        assert_matches!(
            doc.stream_into(&mut Vec::<Event>::new()),
            Err(ResolveError::IdNotFound { id, .. }) if id == "three"
        );

        let sink = MemorySink::new();
        let r = resolver(MissingIdPolicy::Warn);
        let reporter = ErrorReporter::with_sink(RecoveryPolicy::Warn, sink.clone()).shared();
        let doc = r.resolve_with_reporter(href, None, reporter).unwrap();
        let mut out: Vec<Event> = vec![];
        assert_matches!(doc.stream_into(&mut out), Ok(2));
        assert_eq!(out, vec![Event::StartDocument, Event::EndDocument]);
        assert_eq!(sink.severities(), vec![Severity::Warning]);

        let sink = MemorySink::new();
        let r = resolver(MissingIdPolicy::Ignore);
        let reporter = ErrorReporter::with_sink(RecoveryPolicy::Warn, sink.clone()).shared();
        let doc = r.resolve_with_reporter(href, None, reporter).unwrap();
        assert_matches!(doc.stream_into(&mut Vec::<Event>::new()), Ok(2));
        assert!(sink.is_empty());
    }

    #[test]
    fn fetch_failure() {
        let r = resolver(MissingIdPolicy::Warn);
        assert_matches!(
            r.resolve("other.xml", Some("http://example.com/docs/")).err(),
            Some(ResolveError::Fetch(FetchError::NotFound(_)))
        );
    }

    #[test]
    fn fatal_parse_error() {
        let r = DocumentResolver::new(
            MemoryFetcher::new().with("urn:x:bad", "<a><b></a>"),
            StreamingParserFactory::default(),
            ResolverOptions::default(),
        );
        let reporter = ErrorReporter::with_sink(RecoveryPolicy::Warn, MemorySink::new()).shared();
        let doc = r.resolve_with_reporter("urn:x:bad", None, reporter).unwrap();
        assert_matches!(doc.stream_into(&mut Vec::<Event>::new()), Err(ResolveError::Parse(d)) if d.is_fatal());
        assert!(doc.reporter().borrow().has_failed());
    }

    #[test]
    fn relative_base_is_expanded() {
        let cwd = std::env::current_dir().unwrap();
        let uri = absolute_uri("b.xml", Some("dir/a.xml")).unwrap();
        let expected = AbsoluteUri::from_file_path(&cwd.join("dir").join("b.xml")).unwrap();
        assert_eq!(uri.as_str(), expected.as_str());
    }

    #[test]
    fn missing_id_policy_names() {
        assert_eq!("fail".parse::<MissingIdPolicy>(), Ok(MissingIdPolicy::Fail));
        assert_eq!("ignore".parse::<MissingIdPolicy>(), Ok(MissingIdPolicy::Ignore));
        assert_eq!(
            "sometimes".parse::<MissingIdPolicy>().unwrap_err().to_string(),
            "unknown missing-id policy \"sometimes\" (expected ignore, warn or fail)"
        );
    }
}
