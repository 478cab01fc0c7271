//! Events from the xmlparser tokenizer.
//!
//! xmlparser only tokenizes. Checking that end tags match, resolving
//! namespace prefixes, and expanding entity references all happen here.
//! The replacement text of an internal entity is tokenized again where it
//! is referenced, so entities may carry markup as well as text.

use crate::dtd::DtdAttributeTypes;
use crate::factory::IdRules;
use fnv::FnvHashMap;
use std::collections::VecDeque;
use xmlfetch_model::{
    Attribute, Diagnostic, Event, EventSource, Location, QName, SharedReporter,
};
use xmlparser::{ElementEnd, EntityDefinition, StrSpan, Token, Tokenizer};

pub const XML_NS: &str = "http://www.w3.org/XML/1998/namespace";

/// Entities open inside one another at most this deep.
const MAX_ENTITY_DEPTH: usize = 10;
/// References resolved below one top-level reference.
const MAX_ENTITY_REFERENCES: usize = 255;

#[derive(Clone, Copy)]
enum Replacement<'a> {
    Char(char),
    /// the literal of an internal entity declaration
    Literal(StrSpan<'a>),
}

#[derive(PartialEq, Eq, Copy, Clone, Debug)]
enum Progress {
    NotStarted,
    Running,
    Done,
}

pub struct XmlSource<'a> {
    text: &'a str,
    system_id: String,
    tokenizer: Tokenizer<'a>,
    reporter: SharedReporter,
    id_rules: IdRules,
    stack: ElementStack<'a>,
    entity_definitions: FnvHashMap<&'a str, Replacement<'a>>,
    open_entities: Vec<String>,
    entity_references: usize,
    /// depth of the element stack where the innermost open entity began
    entity_floor: usize,
    dtd: DtdAttributeTypes,
    dtd_subset_start: Option<usize>,
    /// events produced by the last token, not yet handed out
    pending: VecDeque<Event>,
    /// character data not yet emitted; adjacent runs become one event
    text_buf: String,
    progress: Progress,
    seen_root: bool,
}

impl<'a> XmlSource<'a> {
    pub fn new(
        text: &'a str,
        system_id: &str,
        reporter: SharedReporter,
        id_rules: IdRules,
    ) -> XmlSource<'a> {
        let mut entity_definitions = FnvHashMap::default();
        entity_definitions.insert("lt", Replacement::Char('<'));
        entity_definitions.insert("gt", Replacement::Char('>'));
        entity_definitions.insert("amp", Replacement::Char('&'));
        entity_definitions.insert("apos", Replacement::Char('\''));
        entity_definitions.insert("quot", Replacement::Char('"'));
        XmlSource {
            text,
            system_id: system_id.to_string(),
            tokenizer: Tokenizer::from(text),
            reporter,
            id_rules,
            stack: ElementStack::default(),
            entity_definitions,
            open_entities: vec![],
            entity_references: 0,
            entity_floor: 0,
            dtd: DtdAttributeTypes::default(),
            dtd_subset_start: None,
            pending: VecDeque::new(),
            text_buf: String::new(),
            progress: Progress::NotStarted,
            seen_root: false,
        }
    }

    fn location(&self, offset: usize) -> Location {
        let (line, column) = line_col(self.text, offset);
        Location::new(Some(&self.system_id), line, column).with_offset(offset)
    }

    fn fatal(&self, message: impl Into<String>, offset: usize) -> Diagnostic {
        let diagnostic = Diagnostic::fatal(message).at(self.location(offset));
        match self.reporter.borrow_mut().report(diagnostic.clone()) {
            Err(reported) => reported,
            Ok(()) => diagnostic,
        }
    }

    fn recoverable(&self, message: impl Into<String>, offset: usize) -> Result<(), Diagnostic> {
        self.reporter
            .borrow_mut()
            .report(Diagnostic::error(message).at(self.location(offset)))
    }

    fn warning(&self, message: impl Into<String>, offset: usize) -> Result<(), Diagnostic> {
        self.reporter
            .borrow_mut()
            .report(Diagnostic::warning(message).at(self.location(offset)))
    }

    fn tokenizer_error(&self, err: xmlparser::Error) -> Diagnostic {
        let pos = err.pos();
        let offset = offset_of(self.text, pos.row, pos.col);
        self.fatal(err.to_string(), offset)
    }

    fn push(&mut self, event: Event) {
        self.flush_text();
        self.pending.push_back(event);
    }

    fn flush_text(&mut self) {
        if !self.text_buf.is_empty() {
            let text = std::mem::take(&mut self.text_buf);
            self.pending.push_back(Event::Characters(text));
        }
    }

    fn token(&mut self, token: Token<'a>) -> Result<(), Diagnostic> {
        match token {
            Token::Declaration { encoding, .. } => {
                if let Some(encoding) = encoding {
                    if !is_supported_encoding(encoding.as_str()) {
                        return Err(self.fatal(
                            format!("Unsupported encoding {:?}", encoding.as_str()),
                            encoding.start(),
                        ));
                    }
                }
            }
            Token::ProcessingInstruction {
                target, content, ..
            } => self.push(Event::ProcessingInstruction {
                target: target.to_string(),
                data: content.map(|c| c.to_string()),
            }),
            Token::Comment { text, .. } => self.push(Event::Comment(text.to_string())),
            Token::DtdStart {
                external_id, span, ..
            } => {
                if external_id.is_some() {
                    self.warning("External DTD subset is not read", span.start())?;
                }
                self.dtd_subset_start = Some(span.end());
            }
            Token::EmptyDtd {
                external_id, span, ..
            } => {
                if external_id.is_some() {
                    self.warning("External DTD subset is not read", span.start())?;
                }
            }
            Token::EntityDeclaration {
                name,
                definition,
                span,
            } => match definition {
                EntityDefinition::EntityValue(val) => {
                    // the first declaration of an entity is binding
                    self.entity_definitions
                        .entry(name.as_str())
                        .or_insert(Replacement::Literal(val));
                }
                EntityDefinition::ExternalId(_) => {
                    self.recoverable(
                        format!("External entity {:?} is not supported", name.as_str()),
                        span.start(),
                    )?;
                }
            },
            Token::DtdEnd { span } => {
                if let Some(start) = self.dtd_subset_start.take() {
                    self.dtd = DtdAttributeTypes::parse(&self.text[start..span.start()]);
                }
            }
            Token::ElementStart {
                prefix,
                local,
                span,
            } => {
                if self.seen_root && self.stack.is_empty() {
                    return Err(self.fatal(
                        "Markup after the root element is not allowed",
                        span.start(),
                    ));
                }
                self.seen_root = true;
                self.stack.push(prefix, local, span);
            }
            Token::Attribute {
                prefix,
                local,
                value,
                span,
            } => {
                let mut expanded = String::with_capacity(value.as_str().len());
                self.attribute_value(&mut expanded, value.start(), value.as_str())?;
                self.stack.add_attr(prefix, local, expanded, span);
            }
            Token::ElementEnd { end, span } => match end {
                ElementEnd::Open => self.open_element()?,
                ElementEnd::Empty => {
                    self.open_element()?;
                    self.close_element();
                }
                ElementEnd::Close(prefix, local) => {
                    // an entity may only close elements it opened itself
                    let open = match self.stack.last() {
                        Some(open) if self.stack.len() > self.entity_floor => open,
                        _ => {
                            return Err(self.fatal(
                                format!("Unexpected end tag </{}>", lexical(prefix, local)),
                                span.start(),
                            ));
                        }
                    };
                    if open.prefix.as_str() != prefix.as_str()
                        || open.local.as_str() != local.as_str()
                    {
                        let message = format!(
                            "The end tag </{}> does not match the start tag <{}>",
                            lexical(prefix, local),
                            lexical(open.prefix, open.local)
                        );
                        return Err(self.fatal(message, span.start()));
                    }
                    self.close_element();
                }
            },
            Token::Text { text } => {
                if self.stack.is_empty() {
                    if !is_whitespace_str(text.as_str()) {
                        return Err(self.fatal(
                            "Text is not allowed outside the root element",
                            text.start(),
                        ));
                    }
                } else {
                    self.characters(text)?;
                }
            }
            Token::Cdata { text, span } => {
                if self.stack.is_empty() {
                    return Err(self.fatal(
                        "CDATA is not allowed outside the root element",
                        span.start(),
                    ));
                }
                self.text_buf.push_str(text.as_str());
            }
        }
        Ok(())
    }

    fn open_element(&mut self) -> Result<(), Diagnostic> {
        self.flush_text();
        let Some(elem) = self.stack.last() else {
            return Ok(());
        };
        let start = elem.span.start();
        let name = match self.stack.resolve(elem.prefix, elem.local, true) {
            Ok(name) => name,
            Err(prefix) => {
                self.recoverable(
                    format!("The prefix {prefix:?} is not defined"),
                    elem.prefix.start(),
                )?;
                QName::new(elem.prefix.as_str(), elem.local.as_str(), None)
            }
        };
        let element_lexical = lexical(elem.prefix, elem.local);
        let mut attributes: Vec<Attribute> = Vec::with_capacity(elem.attributes.len());
        for unresolved in &elem.attributes {
            let attr_name = if unresolved.prefix.as_str().is_empty() {
                QName::local(unresolved.local.as_str())
            } else {
                match self.stack.resolve(unresolved.prefix, unresolved.local, false) {
                    Ok(name) => name,
                    Err(prefix) => {
                        self.recoverable(
                            format!("The prefix {prefix:?} is not defined"),
                            unresolved.prefix.start(),
                        )?;
                        QName::new(unresolved.prefix.as_str(), unresolved.local.as_str(), None)
                    }
                }
            };
            if attributes.iter().any(|a| same_attribute(&a.name, &attr_name)) {
                return Err(self.fatal(
                    format!(
                        "Attribute {:?} appears more than once on <{}>",
                        attr_name.lexical(),
                        element_lexical
                    ),
                    unresolved.span.start(),
                ));
            }
            let attr_type = self.id_rules.classify(
                Some(&self.dtd),
                &element_lexical,
                &attr_name,
            );
            attributes.push(Attribute {
                name: attr_name,
                value: unresolved.value.clone(),
                attr_type,
            });
        }
        for ns in &elem.namespaces {
            self.pending.push_back(Event::StartPrefixMapping {
                prefix: ns.prefix.clone(),
                uri: ns.uri.clone(),
            });
        }
        tracing::trace!(offset = start, element = %name, "start element");
        self.pending.push_back(Event::StartElement {
            name: name.clone(),
            attributes,
        });
        if let Some(elem) = self.stack.last_mut() {
            elem.name = Some(name);
        }
        Ok(())
    }

    fn close_element(&mut self) {
        let Some(elem) = self.stack.pop() else {
            return;
        };
        let name = elem
            .name
            .unwrap_or_else(|| QName::new(elem.prefix.as_str(), elem.local.as_str(), None));
        self.push(Event::EndElement { name });
        for ns in elem.namespaces.into_iter().rev() {
            self.pending
                .push_back(Event::EndPrefixMapping { prefix: ns.prefix });
        }
    }

    fn undeclared(&self, name: &str, at: usize) -> Result<(), Diagnostic> {
        self.recoverable(
            format!("The entity \"{name}\" was referenced, but not declared"),
            at,
        )
    }

    fn enter_entity(&mut self, name: &str, at: usize) -> Result<(), Diagnostic> {
        if self.open_entities.iter().any(|open| open == name) {
            return Err(self.fatal(format!("The entity \"{name}\" refers to itself"), at));
        }
        if self.open_entities.len() >= MAX_ENTITY_DEPTH
            || self.entity_references >= MAX_ENTITY_REFERENCES
        {
            return Err(self.fatal(
                format!("Too many nested references expanding the entity \"{name}\""),
                at,
            ));
        }
        if !self.open_entities.is_empty() {
            self.entity_references += 1;
        }
        self.open_entities.push(name.to_string());
        Ok(())
    }

    fn leave_entity(&mut self) {
        self.open_entities.pop();
        if self.open_entities.is_empty() {
            self.entity_references = 0;
        }
    }

    /// Buffer the character data of `text`, replacing references as they
    /// come.
    fn characters(&mut self, text: StrSpan<'a>) -> Result<(), Diagnostic> {
        for piece in parse_entities(text.start(), text.as_str()) {
            match piece {
                Ok(Txt::Text(_, text)) => self.text_buf.push_str(text),
                Ok(Txt::Char(_, c)) => self.text_buf.push(c),
                Ok(Txt::Entity(at, name)) => match self.entity_definitions.get(name).copied() {
                    Some(Replacement::Char(c)) => self.text_buf.push(c),
                    Some(Replacement::Literal(value)) => self.include_entity(name, at, value)?,
                    None => {
                        self.undeclared(name, at)?;
                        self.text_buf.push('&');
                        self.text_buf.push_str(name);
                        self.text_buf.push(';');
                    }
                },
                Err(EntityError { at }) => {
                    return Err(self.fatal("Invalid or unclosed entity reference", at));
                }
            }
        }
        Ok(())
    }

    /// Tokenize the replacement text of entity `name` in place of the
    /// reference at byte `at`. Elements it opens must close within it.
    fn include_entity(
        &mut self,
        name: &str,
        at: usize,
        value: StrSpan<'a>,
    ) -> Result<(), Diagnostic> {
        self.enter_entity(name, at)?;
        let outer_floor = std::mem::replace(&mut self.entity_floor, self.stack.len());
        for token in Tokenizer::from_fragment(self.text, value.range()) {
            match token {
                Ok(token) => self.token(token)?,
                Err(err) => return Err(self.tokenizer_error(err)),
            }
        }
        if self.stack.len() > self.entity_floor {
            if let Some(open) = self.stack.last() {
                let message = format!(
                    "Element <{}> is not closed before the end of the entity \"{name}\"",
                    lexical(open.prefix, open.local)
                );
                return Err(self.fatal(message, open.span.start()));
            }
        }
        self.entity_floor = outer_floor;
        self.leave_entity();
        Ok(())
    }

    /// Append the normalized value of an attribute, written as `raw` at
    /// byte `pos`, to `out`.
    fn attribute_value(&mut self, out: &mut String, pos: usize, raw: &str) -> Result<(), Diagnostic> {
        for piece in parse_entities(pos, raw) {
            match piece {
                Ok(Txt::Text(_, text)) => out.extend(text.chars().map(normalize_whitespace)),
                Ok(Txt::Char(_, c)) => out.push(c),
                Ok(Txt::Entity(at, name)) => match self.entity_definitions.get(name).copied() {
                    Some(Replacement::Char(c)) => out.push(c),
                    Some(Replacement::Literal(value)) => {
                        if value.as_str().contains('<') {
                            return Err(self.fatal(
                                format!(
                                    "The entity \"{name}\" contains '<' and cannot be used in an attribute value"
                                ),
                                at,
                            ));
                        }
                        self.enter_entity(name, at)?;
                        self.attribute_value(out, value.start(), value.as_str())?;
                        self.leave_entity();
                    }
                    None => {
                        self.undeclared(name, at)?;
                        out.push('&');
                        out.push_str(name);
                        out.push(';');
                    }
                },
                Err(EntityError { at }) => {
                    return Err(self.fatal("Invalid or unclosed entity reference", at));
                }
            }
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<(), Diagnostic> {
        if let Some(open) = self.stack.last() {
            return Err(self.fatal(
                format!(
                    "Element <{}> is not closed before the end of the document",
                    lexical(open.prefix, open.local)
                ),
                open.span.start(),
            ));
        }
        if !self.seen_root {
            return Err(self.fatal("The document has no root element", self.text.len()));
        }
        self.push(Event::EndDocument);
        self.progress = Progress::Done;
        Ok(())
    }
}

impl EventSource for XmlSource<'_> {
    fn next_event(&mut self) -> Option<Result<Event, Diagnostic>> {
        loop {
            if let Some(evt) = self.pending.pop_front() {
                return Some(Ok(evt));
            }
            match self.progress {
                Progress::NotStarted => {
                    self.progress = Progress::Running;
                    return Some(Ok(Event::StartDocument));
                }
                Progress::Done => return None,
                Progress::Running => {}
            }
            let result = match self.tokenizer.next() {
                Some(Ok(token)) => self.token(token),
                Some(Err(err)) => Err(self.tokenizer_error(err)),
                None => self.finish(),
            };
            if let Err(diagnostic) = result {
                self.progress = Progress::Done;
                self.pending.clear();
                return Some(Err(diagnostic));
            }
        }
    }
}

fn lexical(prefix: StrSpan<'_>, local: StrSpan<'_>) -> String {
    if prefix.as_str().is_empty() {
        local.to_string()
    } else {
        format!("{}:{}", prefix.as_str(), local.as_str())
    }
}

fn is_supported_encoding(name: &str) -> bool {
    ["utf-8", "utf8", "us-ascii", "ascii"]
        .iter()
        .any(|e| e.eq_ignore_ascii_case(name))
}

fn normalize_whitespace(c: char) -> char {
    match c {
        '\t' | '\n' | '\r' => ' ',
        c => c,
    }
}

/// Whether two attribute names clash. A prefix with no binding leaves no
/// namespace to compare, so those names compare as written.
fn same_attribute(a: &QName, b: &QName) -> bool {
    match (&a.namespace_uri, &b.namespace_uri) {
        (None, None) => a.prefix == b.prefix && a.local == b.local,
        _ => a.local == b.local && a.namespace_uri == b.namespace_uri,
    }
}

/// 1-based line and column of byte `offset`, counting columns in chars.
pub fn line_col(text: &str, offset: usize) -> (u32, u32) {
    let offset = offset.min(text.len());
    let before = text.get(..offset).unwrap_or(text);
    let line = before.matches('\n').count() + 1;
    let line_start = before.rfind('\n').map_or(0, |p| p + 1);
    let column = before[line_start..].chars().count() + 1;
    (line as u32, column as u32)
}

/// Byte offset of a 1-based line and column, clamped to the text.
pub fn offset_of(text: &str, line: u32, column: u32) -> usize {
    let mut offset = 0;
    for _ in 1..line {
        match text[offset..].find('\n') {
            Some(p) => offset += p + 1,
            None => return text.len(),
        }
    }
    let rest = &text[offset..];
    let line_end = rest.find('\n').unwrap_or(rest.len());
    offset
        + rest[..line_end]
            .char_indices()
            .nth(column.saturating_sub(1) as usize)
            .map_or(line_end, |(i, _)| i)
}

#[derive(Debug)]
enum Txt<'a> {
    Text(usize, &'a str),
    Entity(usize, &'a str),
    Char(usize, char),
}

#[derive(Debug)]
struct EntityError {
    at: usize,
}

fn parse_entities(pos: usize, text: &str) -> impl Iterator<Item = Result<Txt<'_>, EntityError>> {
    struct Entities<'a> {
        text: &'a str,
        pos: usize,
        offset: usize,
        in_entity: bool,
        failed: bool,
    }
    impl<'a> Iterator for Entities<'a> {
        type Item = Result<Txt<'a>, EntityError>;

        fn next(&mut self) -> Option<Self::Item> {
            if self.failed || self.offset == self.text.len() {
                return None;
            }
            for (i, c) in self.text[self.offset..].char_indices() {
                if self.in_entity {
                    if c == ';' {
                        self.in_entity = false;
                        let text = &self.text[self.offset..self.offset + i];
                        // points at the '&'
                        let at = self.pos + self.offset - 1;
                        let result = if let Some(text) = text.strip_prefix('#') {
                            numeric_entity(at, text)
                        } else if text.is_empty() {
                            Err(EntityError { at })
                        } else {
                            Ok(Txt::Entity(at, text))
                        };
                        self.offset += i + 1;
                        self.failed = result.is_err();
                        return Some(result);
                    }
                } else if c == '&' {
                    self.in_entity = true;
                    let result = Txt::Text(
                        self.offset + self.pos,
                        &self.text[self.offset..self.offset + i],
                    );
                    self.offset += i + 1;
                    return Some(Ok(result));
                }
            }
            if self.in_entity {
                self.failed = true;
                Some(Err(EntityError {
                    at: self.pos + self.offset - 1,
                }))
            } else {
                let result = Txt::Text(self.offset + self.pos, &self.text[self.offset..]);
                self.offset = self.text.len();
                Some(Ok(result))
            }
        }
    }
    fn numeric_entity(at: usize, text: &str) -> Result<Txt<'_>, EntityError> {
        let code = if let Some(hex) = text.strip_prefix('x') {
            u32::from_str_radix(hex, 16).map_err(|_e| EntityError { at })?
        } else {
            text.parse().map_err(|_e| EntityError { at })?
        };
        Ok(Txt::Char(
            at,
            std::char::from_u32(code).ok_or(EntityError { at })?,
        ))
    }
    Entities {
        text,
        pos,
        offset: 0,
        in_entity: false,
        failed: false,
    }
}

fn is_whitespace_char(c: char) -> bool {
    ['\x20', '\x09', '\x0d', '\x0a'].contains(&c)
}

fn is_whitespace_str(s: &str) -> bool {
    s.chars().all(is_whitespace_char)
}

#[derive(Default)]
struct ElementStack<'a> {
    elements: Vec<ElementState<'a>>,
}

impl<'a> ElementStack<'a> {
    fn lookup_namespace_uri(&self, prefix: &str) -> Option<&str> {
        self.elements
            .iter()
            .rev()
            .find_map(|elem| elem.lookup_namespace_uri(prefix))
    }

    /// Resolve a prefixed name; `Err` carries a prefix with no binding.
    ///
    /// The default namespace applies to element names only.
    fn resolve(
        &self,
        prefix: StrSpan<'a>,
        local: StrSpan<'a>,
        is_element: bool,
    ) -> Result<QName, String> {
        let namespace_uri = match prefix.as_str() {
            "" if is_element => self
                .lookup_namespace_uri("")
                .filter(|ns| !ns.is_empty()),
            "" => None,
            "xml" => Some(XML_NS),
            p => Some(self.lookup_namespace_uri(p).ok_or_else(|| p.to_string())?),
        };
        Ok(QName::new(prefix.as_str(), local.as_str(), namespace_uri))
    }

    fn push(&mut self, prefix: StrSpan<'a>, local: StrSpan<'a>, span: StrSpan<'a>) {
        self.elements.push(ElementState {
            prefix,
            local,
            span,
            namespaces: vec![],
            attributes: vec![],
            name: None,
        })
    }

    fn add_attr(&mut self, prefix: StrSpan<'a>, local: StrSpan<'a>, value: String, span: StrSpan<'a>) {
        let Some(elem) = self.elements.last_mut() else {
            return;
        };
        if prefix.as_str() == "xmlns" {
            elem.namespaces.push(Ns {
                prefix: local.to_string(),
                uri: value,
            })
        } else if prefix.as_str().is_empty() && local.as_str() == "xmlns" {
            elem.namespaces.push(Ns {
                prefix: String::new(),
                uri: value,
            })
        } else {
            elem.attributes.push(UnresolvedAttr {
                prefix,
                local,
                value,
                span,
            })
        }
    }

    fn last(&self) -> Option<&ElementState<'a>> {
        self.elements.last()
    }

    fn last_mut(&mut self) -> Option<&mut ElementState<'a>> {
        self.elements.last_mut()
    }

    fn pop(&mut self) -> Option<ElementState<'a>> {
        self.elements.pop()
    }

    fn len(&self) -> usize {
        self.elements.len()
    }

    fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}

struct UnresolvedAttr<'a> {
    prefix: StrSpan<'a>,
    local: StrSpan<'a>,
    value: String,
    span: StrSpan<'a>,
}

struct ElementState<'a> {
    prefix: StrSpan<'a>,
    local: StrSpan<'a>,
    span: StrSpan<'a>,
    namespaces: Vec<Ns>,
    attributes: Vec<UnresolvedAttr<'a>>,
    /// set once the start tag is complete
    name: Option<QName>,
}

impl ElementState<'_> {
    fn lookup_namespace_uri(&self, prefix: &str) -> Option<&str> {
        self.namespaces
            .iter()
            .rev()
            .find(|ns| ns.prefix == prefix)
            .map(|ns| ns.uri.as_str())
    }
}

struct Ns {
    prefix: String,
    uri: String,
}
