use xmlfetch_model::{
    Diagnostic, DiagnosticSink, ErrorReporter, Event, EventSink, RecoveryPolicy, SharedReporter,
};
use xmlfetch_source::{
    DocumentInput, DocumentResolver, FsFetcher, IdRules, MissingIdPolicy, ParserFactory,
    ResolveError, ResolvedDocument, ResolverOptions, StreamingParserFactory, TreeParserFactory,
};

use std::io::{self, Write};
use std::process::exit;

use structopt::StructOpt;
use tracing_subscriber::prelude::*;

const EXIT_FETCH: i32 = 1;
const EXIT_PARSE: i32 = 2;
const EXIT_ID_NOT_FOUND: i32 = 3;

#[derive(Debug, StructOpt)]
#[structopt(name = "xmlfetch")]
enum Cli {
    /// Print the events of a document, or of the element its fragment names
    Events {
        href: String,
        /// URI that a relative href is resolved against
        #[structopt(long)]
        base: Option<String>,
        /// silent, warn or strict
        #[structopt(long, default_value = "warn")]
        policy: RecoveryPolicy,
        /// Attribute name to treat as an element ID (repeatable)
        #[structopt(long = "id-attr")]
        id_attr: Vec<String>,
        /// ignore, warn or fail
        #[structopt(long, default_value = "warn")]
        missing_id: MissingIdPolicy,
        /// Parse the whole document with roxmltree before streaming
        #[structopt(long)]
        tree: bool,
    },
    /// Print the absolute URI and ID a reference resolves to
    Resolve {
        href: String,
        #[structopt(long)]
        base: Option<String>,
    },
}

fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "xmlfetch_source=warn,xmlfetch_model=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let code = match Cli::from_args() {
        Cli::Events {
            href,
            base,
            policy,
            id_attr,
            missing_id,
            tree,
        } => {
            let options = ResolverOptions { missing_id };
            let rules = IdRules::new(id_attr);
            let reporter = ErrorReporter::with_sink(policy, ToolSink).shared();
            if tree {
                let resolver =
                    DocumentResolver::new(FsFetcher, TreeParserFactory::new(rules), options);
                events(&resolver, &href, base.as_deref(), reporter)
            } else {
                let resolver =
                    DocumentResolver::new(FsFetcher, StreamingParserFactory::new(rules), options);
                events(&resolver, &href, base.as_deref(), reporter)
            }
        }
        Cli::Resolve { href, base } => resolve(&href, base.as_deref()),
    };
    exit(code)
}

fn resolve(href: &str, base: Option<&str>) -> i32 {
    let reference = xmlfetch_uri::split_fragment(href);
    match xmlfetch_source::absolute_uri(reference.uri, base) {
        Ok(uri) => {
            println!("{uri}");
            if let Some(id) = reference.id() {
                println!("#{id}");
            }
            0
        }
        Err(err) => {
            eprintln!("xmlfetch: {err}");
            EXIT_FETCH
        }
    }
}

fn events<P: ParserFactory>(
    resolver: &DocumentResolver<FsFetcher, P>,
    href: &str,
    base: Option<&str>,
    reporter: SharedReporter,
) -> i32 {
    let doc = match resolver.resolve_with_reporter(href, base, reporter) {
        Ok(doc) => doc,
        Err(err) => {
            eprintln!("xmlfetch: {err}");
            return EXIT_FETCH;
        }
    };
    let stdout = io::stdout();
    let mut printer = Printer {
        out: stdout.lock(),
        error: None,
    };
    let result = doc.stream_into(&mut printer);
    if let Some(err) = printer.error {
        eprintln!("xmlfetch: writing events: {err}");
        return EXIT_FETCH;
    }
    match result {
        Ok(count) => {
            tracing::debug!(count, "done");
            0
        }
        Err(ResolveError::Parse(d)) => {
            emit(&doc, &d);
            EXIT_PARSE
        }
        Err(err @ ResolveError::IdNotFound { .. }) => {
            eprintln!("xmlfetch: {err}");
            EXIT_ID_NOT_FOUND
        }
        Err(err) => {
            eprintln!("xmlfetch: {err}");
            EXIT_FETCH
        }
    }
}

/// Show a fatal diagnostic with an excerpt of the document.
fn emit<P: ParserFactory>(doc: &ResolvedDocument<'_, P>, err: &Diagnostic) {
    let source = match doc.input() {
        DocumentInput::Bytes(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        DocumentInput::Text(text) => text.clone(),
        DocumentInput::Tree(_) => String::new(),
    };
    let (map, d): (codemap::CodeMap, _) =
        xmlfetch_source::render::diagnostic(doc.uri().to_string(), source, err);
    let mut emitter =
        codemap_diagnostic::Emitter::stderr(codemap_diagnostic::ColorConfig::Auto, Some(&map));
    emitter.emit(&d[..]);
}

/// Writes warnings and recoverable errors to stderr. Fatal errors are left
/// to [`emit`], which shows them against the document text.
struct ToolSink;

impl DiagnosticSink for ToolSink {
    fn deliver(&mut self, diagnostic: &Diagnostic, rendered: &str) {
        if !diagnostic.is_fatal() {
            eprintln!("{rendered}");
        }
    }
}

struct Printer<W> {
    out: W,
    error: Option<io::Error>,
}

impl<W: Write> EventSink for Printer<W> {
    fn event(&mut self, event: Event) {
        if self.error.is_some() {
            return;
        }
        if let Err(err) = writeln!(self.out, "{event}") {
            self.error = Some(err);
        }
    }
}
