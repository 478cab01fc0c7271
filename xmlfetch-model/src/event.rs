use crate::diagnostic::Diagnostic;
use std::collections::VecDeque;
use std::fmt;

#[derive(PartialEq, Eq, Hash, Clone, Debug, Default)]
pub struct QName {
    pub prefix: String,
    pub local: String,
    pub namespace_uri: Option<String>,
}

impl QName {
    pub fn new(prefix: &str, local: &str, namespace_uri: Option<&str>) -> QName {
        QName {
            prefix: prefix.to_string(),
            local: local.to_string(),
            namespace_uri: namespace_uri.map(str::to_string),
        }
    }

    /// A name in no namespace, without a prefix.
    pub fn local(local: &str) -> QName {
        QName::new("", local, None)
    }

    /// The name as written in the document, `prefix:local` or `local`.
    pub fn lexical(&self) -> String {
        if self.prefix.is_empty() {
            self.local.clone()
        } else {
            format!("{}:{}", self.prefix, self.local)
        }
    }
}

impl fmt::Display for QName {
    /// Clark notation, `{uri}local`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.namespace_uri {
            Some(ref ns) => write!(f, "{{{}}}{}", ns, self.local),
            None => f.write_str(&self.local),
        }
    }
}

/// The type an attribute was declared with.
///
/// Attributes with no declaration are `Cdata`.
#[derive(PartialEq, Eq, Hash, Copy, Clone, Debug, Default)]
pub enum AttributeType {
    #[default]
    Cdata,
    Id,
    IdRef,
    IdRefs,
    Entity,
    Entities,
    NmToken,
    NmTokens,
    Notation,
    Enumeration,
}

impl AttributeType {
    pub fn name(&self) -> &'static str {
        match self {
            AttributeType::Cdata => "CDATA",
            AttributeType::Id => "ID",
            AttributeType::IdRef => "IDREF",
            AttributeType::IdRefs => "IDREFS",
            AttributeType::Entity => "ENTITY",
            AttributeType::Entities => "ENTITIES",
            AttributeType::NmToken => "NMTOKEN",
            AttributeType::NmTokens => "NMTOKENS",
            AttributeType::Notation => "NOTATION",
            AttributeType::Enumeration => "ENUMERATION",
        }
    }
}

#[derive(PartialEq, Eq, Hash, Clone, Debug)]
pub struct Attribute {
    pub name: QName,
    pub value: String,
    pub attr_type: AttributeType,
}

impl Attribute {
    pub fn new(name: QName, value: &str) -> Attribute {
        Attribute {
            name,
            value: value.to_string(),
            attr_type: AttributeType::Cdata,
        }
    }

    pub fn id(name: QName, value: &str) -> Attribute {
        Attribute {
            name,
            value: value.to_string(),
            attr_type: AttributeType::Id,
        }
    }
}

/// One step in a document's markup.
///
/// A well-formed stream starts with `StartDocument`, ends with
/// `EndDocument`, and nests elements and prefix mappings in LIFO order.
/// The prefix mappings for an element precede its `StartElement` and the
/// matching `EndPrefixMapping`s follow its `EndElement`.
#[derive(PartialEq, Eq, Clone, Debug)]
pub enum Event {
    StartDocument,
    EndDocument,
    StartElement {
        name: QName,
        attributes: Vec<Attribute>,
    },
    EndElement {
        name: QName,
    },
    Characters(String),
    IgnorableWhitespace(String),
    Comment(String),
    ProcessingInstruction {
        target: String,
        data: Option<String>,
    },
    StartPrefixMapping {
        prefix: String,
        uri: String,
    },
    EndPrefixMapping {
        prefix: String,
    },
}

impl Event {
    pub fn kind(&self) -> &'static str {
        match self {
            Event::StartDocument => "start-document",
            Event::EndDocument => "end-document",
            Event::StartElement { .. } => "start-element",
            Event::EndElement { .. } => "end-element",
            Event::Characters(_) => "characters",
            Event::IgnorableWhitespace(_) => "ignorable-whitespace",
            Event::Comment(_) => "comment",
            Event::ProcessingInstruction { .. } => "processing-instruction",
            Event::StartPrefixMapping { .. } => "start-prefix-mapping",
            Event::EndPrefixMapping { .. } => "end-prefix-mapping",
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::StartElement { name, attributes } => {
                write!(f, "{} {}", self.kind(), name)?;
                for att in attributes {
                    write!(f, " {}={:?}", att.name, att.value)?;
                    if att.attr_type != AttributeType::Cdata {
                        write!(f, "[{}]", att.attr_type.name())?;
                    }
                }
                Ok(())
            }
            Event::EndElement { name } => write!(f, "{} {}", self.kind(), name),
            Event::Characters(text) | Event::IgnorableWhitespace(text) | Event::Comment(text) => {
                write!(f, "{} {:?}", self.kind(), text)
            }
            Event::ProcessingInstruction { target, data } => match data {
                Some(data) => write!(f, "{} {} {:?}", self.kind(), target, data),
                None => write!(f, "{} {}", self.kind(), target),
            },
            Event::StartPrefixMapping { prefix, uri } => {
                write!(f, "{} {:?} {}", self.kind(), prefix, uri)
            }
            Event::EndPrefixMapping { prefix } => write!(f, "{} {:?}", self.kind(), prefix),
            Event::StartDocument | Event::EndDocument => f.write_str(self.kind()),
        }
    }
}

/// Receives events pushed by a source or filter.
pub trait EventSink {
    fn event(&mut self, event: Event);
}

impl EventSink for Vec<Event> {
    fn event(&mut self, event: Event) {
        self.push(event)
    }
}

impl EventSink for VecDeque<Event> {
    fn event(&mut self, event: Event) {
        self.push_back(event)
    }
}

impl<K: EventSink + ?Sized> EventSink for &mut K {
    fn event(&mut self, event: Event) {
        (**self).event(event)
    }
}

/// A forward-only stream of events.
///
/// `Some(Err(_))` carries a fatal diagnostic and ends the stream; every
/// later call returns `None`.
pub trait EventSource {
    fn next_event(&mut self) -> Option<Result<Event, Diagnostic>>;

    /// Push every remaining event into `sink`, returning how many there were.
    fn drain_into(&mut self, sink: &mut dyn EventSink) -> Result<usize, Diagnostic> {
        let mut count = 0;
        while let Some(evt) = self.next_event() {
            sink.event(evt?);
            count += 1;
        }
        Ok(count)
    }
}

impl<S: EventSource + ?Sized> EventSource for Box<S> {
    fn next_event(&mut self) -> Option<Result<Event, Diagnostic>> {
        (**self).next_event()
    }
}

/// Replays events already held in memory.
pub struct Replay<'a> {
    events: std::slice::Iter<'a, Event>,
}

impl<'a> Replay<'a> {
    pub fn new(events: &'a [Event]) -> Replay<'a> {
        Replay {
            events: events.iter(),
        }
    }
}

impl EventSource for Replay<'_> {
    fn next_event(&mut self) -> Option<Result<Event, Diagnostic>> {
        self.events.next().cloned().map(Ok)
    }
}
