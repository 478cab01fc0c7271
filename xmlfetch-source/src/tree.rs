//! Events from a document already parsed into a roxmltree tree.

use crate::dtd::{DtdAttributeTypes, internal_subset};
use crate::factory::IdRules;
use crate::stream::{XML_NS, offset_of};
use roxmltree::{Node, NodeType, ParsingOptions};
use xmlfetch_model::{Attribute, Diagnostic, Event, EventSource, Location, QName, Replay};

/// A document held as the events it produces.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreParsed {
    events: Vec<Event>,
}

impl PreParsed {
    pub fn from_events(events: Vec<Event>) -> PreParsed {
        PreParsed { events }
    }

    /// Parse `text` with roxmltree. Parse errors are fatal and are not
    /// reported anywhere; the caller decides what to do with them.
    pub fn parse(text: &str, system_id: &str, id_rules: &IdRules) -> Result<PreParsed, Diagnostic> {
        let options = ParsingOptions {
            allow_dtd: true,
            ..ParsingOptions::default()
        };
        let doc = roxmltree::Document::parse_with_options(text, options).map_err(|err| {
            let pos = err.pos();
            Diagnostic::fatal(err.to_string()).at(
                Location::new(Some(system_id), pos.row, pos.col)
                    .with_offset(offset_of(text, pos.row, pos.col)),
            )
        })?;
        let dtd = internal_subset(text).map(DtdAttributeTypes::parse);
        Ok(PreParsed::from_document(&doc, dtd.as_ref(), id_rules))
    }

    pub fn from_document(
        doc: &roxmltree::Document<'_>,
        dtd: Option<&DtdAttributeTypes>,
        id_rules: &IdRules,
    ) -> PreParsed {
        let mut events = vec![Event::StartDocument];
        for child in doc.root().children() {
            walk(child, dtd, id_rules, &mut events);
        }
        events.push(Event::EndDocument);
        PreParsed { events }
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn replay(&self) -> Replay<'_> {
        Replay::new(&self.events)
    }

    pub fn into_source(self) -> TreeEvents {
        TreeEvents {
            events: self.events.into_iter(),
        }
    }
}

/// Hands out the events of a [`PreParsed`] it owns.
pub struct TreeEvents {
    events: std::vec::IntoIter<Event>,
}

impl EventSource for TreeEvents {
    fn next_event(&mut self) -> Option<Result<Event, Diagnostic>> {
        self.events.next().map(Ok)
    }
}

fn walk(
    node: Node<'_, '_>,
    dtd: Option<&DtdAttributeTypes>,
    id_rules: &IdRules,
    events: &mut Vec<Event>,
) {
    match node.node_type() {
        NodeType::Element => {
            let declared = declared(node);
            for (prefix, uri) in &declared {
                events.push(Event::StartPrefixMapping {
                    prefix: prefix.clone(),
                    uri: uri.clone(),
                });
            }
            let name = element_name(node);
            let element = name.lexical();
            let attributes = node
                .attributes()
                .map(|att| {
                    let name = match att.namespace() {
                        Some(uri) => QName::new(
                            node.lookup_prefix(uri).unwrap_or(""),
                            att.name(),
                            Some(uri),
                        ),
                        None => QName::local(att.name()),
                    };
                    let attr_type = id_rules.classify(dtd, &element, &name);
                    Attribute {
                        name,
                        value: att.value().to_string(),
                        attr_type,
                    }
                })
                .collect();
            events.push(Event::StartElement {
                name: name.clone(),
                attributes,
            });
            for child in node.children() {
                walk(child, dtd, id_rules, events);
            }
            events.push(Event::EndElement { name });
            for (prefix, _) in declared.into_iter().rev() {
                events.push(Event::EndPrefixMapping { prefix });
            }
        }
        NodeType::Text => events.push(Event::Characters(node.text().unwrap_or("").to_string())),
        NodeType::Comment => events.push(Event::Comment(node.text().unwrap_or("").to_string())),
        NodeType::PI => {
            if let Some(pi) = node.pi() {
                events.push(Event::ProcessingInstruction {
                    target: pi.target.to_string(),
                    data: pi.value.map(str::to_string),
                })
            }
        }
        NodeType::Root => {}
    }
}

fn element_name(node: Node<'_, '_>) -> QName {
    let tag = node.tag_name();
    match tag.namespace() {
        Some(uri) => QName::new(node.lookup_prefix(uri).unwrap_or(""), tag.name(), Some(uri)),
        None => QName::local(tag.name()),
    }
}

/// Namespace bindings that `node` introduces, as (prefix, uri) pairs
/// ordered by prefix. roxmltree only exposes the bindings in scope, so
/// these are the ones not already in scope on the parent.
fn declared(node: Node<'_, '_>) -> Vec<(String, String)> {
    let inherited: Vec<(Option<&str>, &str)> = node
        .parent_element()
        .map(|p| p.namespaces().map(|ns| (ns.name(), ns.uri())).collect())
        .unwrap_or_default();
    let mut out: Vec<(String, String)> = node
        .namespaces()
        .filter(|ns| ns.uri() != XML_NS && !inherited.contains(&(ns.name(), ns.uri())))
        .map(|ns| (ns.name().unwrap_or("").to_string(), ns.uri().to_string()))
        .collect();
    let had_default = inherited.iter().any(|(name, _)| name.is_none());
    let has_default = node.namespaces().any(|ns| ns.name().is_none());
    if had_default && !has_default {
        // xmlns="" on this element
        out.push((String::new(), String::new()));
    }
    out.sort();
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use xmlfetch_model::AttributeType;

    fn parse(text: &str) -> PreParsed {
        PreParsed::parse(text, "urn:t", &IdRules::default()).unwrap()
    }

    #[test]
    fn namespaces_declared_once() {
        let tree = parse("<a xmlns:z='urn:z' xmlns='urn:d'><z:b xmlns:y='urn:y'/></a>");
        let kinds: Vec<String> = tree.events().iter().map(|e| e.to_string()).collect();
        assert_eq!(
            kinds,
            vec![
                "start-document",
                "start-prefix-mapping \"\" urn:d",
                "start-prefix-mapping \"z\" urn:z",
                "start-element {urn:d}a",
                "start-prefix-mapping \"y\" urn:y",
                "start-element {urn:z}b",
                "end-element {urn:z}b",
                "end-prefix-mapping \"y\"",
                "end-element {urn:d}a",
                "end-prefix-mapping \"z\"",
                "end-prefix-mapping \"\"",
                "end-document",
            ]
        );
    }

    #[test]
    fn nested_content_in_document_order() {
        let tree = parse("<!--top--><a>1<b>2<!--c--><?p d?></b>3</a>");
        let kinds: Vec<String> = tree.events().iter().map(|e| e.to_string()).collect();
        assert_eq!(
            kinds,
            vec![
                "start-document",
                "comment \"top\"",
                "start-element a",
                "characters \"1\"",
                "start-element b",
                "characters \"2\"",
                "comment \"c\"",
                "processing-instruction p \"d\"",
                "end-element b",
                "characters \"3\"",
                "end-element a",
                "end-document",
            ]
        );
        let mut replayed: Vec<Event> = vec![];
        tree.replay().drain_into(&mut replayed).unwrap();
        assert_eq!(replayed, tree.events());
    }

    #[test]
    fn default_namespace_undeclared() {
        let tree = parse("<a xmlns='urn:d'><b xmlns=''/></a>");
        assert_eq!(
            tree.events()[3],
            Event::StartPrefixMapping {
                prefix: "".to_string(),
                uri: "".to_string()
            }
        );
        assert_eq!(
            tree.events()[4],
            Event::StartElement {
                name: QName::local("b"),
                attributes: vec![]
            }
        );
    }

    #[test]
    fn ids_from_internal_subset() {
        let tree = parse("<!DOCTYPE a [<!ATTLIST b k ID #IMPLIED>]><a><b k='x' j='y'/></a>");
        assert_matches!(
            &tree.events()[2],
            Event::StartElement { attributes, .. }
                if attributes[0].attr_type == AttributeType::Id
                    && attributes[1].attr_type == AttributeType::Cdata
        );
    }

    #[test]
    fn parse_error_has_position() {
        let err = PreParsed::parse("<a>\n  <b>\n</a>", "urn:t", &IdRules::default()).unwrap_err();
        assert!(err.is_fatal());
        let loc = err.location.unwrap();
        assert_eq!(loc.line, Some(3));
        assert_eq!(loc.system_id.as_deref(), Some("urn:t"));
    }

    #[test]
    fn owned_source() {
        let tree = parse("<a>t</a>");
        let expected = tree.events().to_vec();
        let mut out: Vec<Event> = vec![];
        tree.into_source().drain_into(&mut out).unwrap();
        assert_eq!(out, expected);
    }
}
