//! Extracting the subtree rooted at the element with a given ID.
//!
//! Outside the subtree nothing but the document boundaries is forwarded.
//! Namespace declarations seen on the way down are held back until the
//! target element is found; at that point the bindings in force are
//! re-issued as prefix mappings around the subtree, so it reads as a
//! complete document on its own.

use crate::event::{AttributeType, Event, EventSink, EventSource};
use crate::filter::{EventFilter, Filtered};
use std::collections::BTreeMap;

#[derive(PartialEq, Eq, Copy, Clone, Debug)]
enum State {
    Searching,
    Active { depth: usize },
    /// The subtree has been emitted; any later element with the same ID is
    /// ignored.
    Finished,
}

pub struct IdSubtreeFilter {
    target: String,
    state: State,
    /// (prefix, uri) declarations in scope and not yet emitted
    pending: Vec<(String, String)>,
    /// prefixes emitted on activation, in emission order
    synthesized: Vec<String>,
}

impl IdSubtreeFilter {
    pub fn new(target: &str) -> IdSubtreeFilter {
        IdSubtreeFilter {
            target: target.to_string(),
            state: State::Searching,
            pending: vec![],
            synthesized: vec![],
        }
    }

    /// Whether an element with the target ID has been seen.
    pub fn matched(&self) -> bool {
        self.state != State::Searching
    }

    fn is_target(&self, event: &Event) -> bool {
        match event {
            Event::StartElement { attributes, .. } => attributes
                .iter()
                .any(|att| att.attr_type == AttributeType::Id && att.value == self.target),
            _ => false,
        }
    }

    /// The bindings in force, oldest declarations overridden by newer ones.
    /// An empty URI undeclares the prefix.
    fn effective_namespaces(&self) -> BTreeMap<String, String> {
        let mut effective = BTreeMap::new();
        for (prefix, uri) in &self.pending {
            if uri.is_empty() {
                effective.remove(prefix);
            } else {
                effective.insert(prefix.clone(), uri.clone());
            }
        }
        effective
    }

    fn pop_pending(&mut self, prefix: &str) {
        if let Some(pos) = self.pending.iter().rposition(|(p, _)| p == prefix) {
            self.pending.remove(pos);
        }
    }

    fn activate(&mut self, start: Event, out: &mut dyn EventSink) {
        tracing::debug!(id = %self.target, "found element with target id");
        self.synthesized.clear();
        for (prefix, uri) in self.effective_namespaces() {
            self.synthesized.push(prefix.clone());
            out.event(Event::StartPrefixMapping { prefix, uri });
        }
        out.event(start);
        self.state = State::Active { depth: 1 };
    }

    fn close(&mut self, out: &mut dyn EventSink) {
        for prefix in self.synthesized.drain(..).rev() {
            out.event(Event::EndPrefixMapping { prefix });
        }
        self.state = State::Finished;
    }
}

impl EventFilter for IdSubtreeFilter {
    fn process(&mut self, event: Event, out: &mut dyn EventSink) {
        match (self.state, event) {
            (_, evt @ (Event::StartDocument | Event::EndDocument)) => out.event(evt),

            (State::Active { depth }, evt @ Event::StartElement { .. }) => {
                self.state = State::Active { depth: depth + 1 };
                out.event(evt);
            }
            (State::Active { depth }, evt @ Event::EndElement { .. }) => {
                out.event(evt);
                if depth == 1 {
                    self.close(out);
                } else {
                    self.state = State::Active { depth: depth - 1 };
                }
            }
            // nested declarations belong to descendants of the target
            (State::Active { .. }, evt) => out.event(evt),

            (State::Searching, evt @ Event::StartElement { .. }) => {
                if self.is_target(&evt) {
                    self.activate(evt, out);
                }
            }
            (State::Searching | State::Finished, Event::StartPrefixMapping { prefix, uri }) => {
                self.pending.push((prefix, uri));
            }
            (State::Searching | State::Finished, Event::EndPrefixMapping { prefix }) => {
                self.pop_pending(&prefix);
            }
            (State::Searching | State::Finished, _) => {}
        }
    }
}

/// Restrict `source` to the subtree of the element whose ID is `id`.
pub fn wrap_with_id_filter<S: EventSource>(source: S, id: &str) -> Filtered<S, IdSubtreeFilter> {
    Filtered::new(source, IdSubtreeFilter::new(id))
}
