//! Attribute types declared by `<!ATTLIST>` in a DTD internal subset.
//!
//! Only the attribute types are kept; content models, notations and
//! default values play no part in event production here.

use fnv::FnvHashMap;
use nom::branch::alt;
use nom::bytes::complete::{tag, take_till, take_while1};
use nom::character::complete::{char, multispace0, multispace1};
use nom::combinator::{opt, value};
use nom::multi::many0;
use nom::sequence::delimited;
use nom::{IResult, Parser};
use xmlfetch_model::AttributeType;
use xmlparser::{Token, Tokenizer};

#[derive(Default, Debug, Clone)]
pub struct DtdAttributeTypes {
    // keyed by the lexical (prefixed) element and attribute names
    types: FnvHashMap<(String, String), AttributeType>,
}

impl DtdAttributeTypes {
    pub fn parse(internal_subset: &str) -> DtdAttributeTypes {
        let mut types = DtdAttributeTypes::default();
        let mut rest = internal_subset;
        while !rest.is_empty() {
            if let Some(after) = rest.strip_prefix("<!--") {
                rest = after.find("-->").map_or("", |p| &after[p + 3..]);
            } else if rest.starts_with("<!ATTLIST") {
                match attlist_decl(rest) {
                    Ok((after, (element, defs))) => {
                        for (attribute, attr_type) in defs {
                            types.declare(element, attribute, attr_type);
                        }
                        rest = after;
                    }
                    Err(_) => {
                        tracing::debug!("skipping unparsable ATTLIST declaration");
                        rest = skip_declaration(rest);
                    }
                }
            } else if rest.starts_with("<?") {
                rest = rest.find("?>").map_or("", |p| &rest[p + 2..]);
            } else if rest.starts_with("<!") {
                rest = skip_declaration(rest);
            } else {
                let first = rest.chars().next().map_or(0, char::len_utf8);
                rest = rest[first..].find('<').map_or("", |p| &rest[first + p..]);
            }
        }
        types
    }

    /// The first declaration of an attribute is binding; later ones are
    /// ignored.
    fn declare(&mut self, element: &str, attribute: &str, attr_type: AttributeType) {
        self.types
            .entry((element.to_string(), attribute.to_string()))
            .or_insert(attr_type);
    }

    pub fn attribute_type(&self, element: &str, attribute: &str) -> Option<AttributeType> {
        self.types
            .get(&(element.to_string(), attribute.to_string()))
            .copied()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }
}

/// The text between `[` and `]` of the document type declaration, if the
/// document has one before its root element.
pub fn internal_subset(text: &str) -> Option<&str> {
    let mut start = None;
    for token in Tokenizer::from(text) {
        match token.ok()? {
            Token::DtdStart { span, .. } => start = Some(span.end()),
            Token::DtdEnd { span } => return start.map(|s| &text[s..span.start()]),
            Token::ElementStart { .. } => return None,
            _ => {}
        }
    }
    None
}

/// Skip a markup declaration, honouring quoted literals.
fn skip_declaration(s: &str) -> &str {
    let mut quote = None;
    for (i, c) in s.char_indices().skip(2) {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if c == '"' || c == '\'' => quote = Some(c),
            None if c == '>' => return &s[i + 1..],
            None => {}
        }
    }
    ""
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, ':' | '_' | '-' | '.') || !c.is_ascii()
}

fn name(i: &str) -> IResult<&str, &str> {
    take_while1(is_name_char).parse(i)
}

fn quoted(i: &str) -> IResult<&str, &str> {
    alt((
        delimited(char('"'), take_till(|c| c == '"'), char('"')),
        delimited(char('\''), take_till(|c| c == '\''), char('\'')),
    ))
    .parse(i)
}

fn enumeration(i: &str) -> IResult<&str, &str> {
    delimited(char('('), take_till(|c| c == ')'), char(')')).parse(i)
}

fn att_type(i: &str) -> IResult<&str, AttributeType> {
    alt((
        value(AttributeType::Cdata, tag("CDATA")),
        value(AttributeType::IdRefs, tag("IDREFS")),
        value(AttributeType::IdRef, tag("IDREF")),
        value(AttributeType::Id, tag("ID")),
        value(AttributeType::Entities, tag("ENTITIES")),
        value(AttributeType::Entity, tag("ENTITY")),
        value(AttributeType::NmTokens, tag("NMTOKENS")),
        value(AttributeType::NmToken, tag("NMTOKEN")),
        value(
            AttributeType::Notation,
            (tag("NOTATION"), multispace1, enumeration),
        ),
        value(AttributeType::Enumeration, enumeration),
    ))
    .parse(i)
}

fn default_decl(i: &str) -> IResult<&str, ()> {
    alt((
        value((), tag("#REQUIRED")),
        value((), tag("#IMPLIED")),
        value((), (opt((tag("#FIXED"), multispace1)), quoted)),
    ))
    .parse(i)
}

fn att_def(i: &str) -> IResult<&str, (&str, AttributeType)> {
    let (i, _) = multispace1.parse(i)?;
    let (i, attribute) = name(i)?;
    let (i, _) = multispace1.parse(i)?;
    let (i, attr_type) = att_type(i)?;
    let (i, _) = multispace1.parse(i)?;
    let (i, ()) = default_decl(i)?;
    Ok((i, (attribute, attr_type)))
}

fn attlist_decl(i: &str) -> IResult<&str, (&str, Vec<(&str, AttributeType)>)> {
    let (i, _) = tag("<!ATTLIST").parse(i)?;
    let (i, _) = multispace1.parse(i)?;
    let (i, element) = name(i)?;
    let (i, defs) = many0(att_def).parse(i)?;
    let (i, _) = multispace0.parse(i)?;
    let (i, _) = char('>').parse(i)?;
    Ok((i, (element, defs)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn simple_id() {
        let t = DtdAttributeTypes::parse("<!ATTLIST b id ID #IMPLIED name CDATA \"x\">");
        assert_eq!(t.attribute_type("b", "id"), Some(AttributeType::Id));
        assert_eq!(t.attribute_type("b", "name"), Some(AttributeType::Cdata));
        assert_eq!(t.attribute_type("a", "id"), None);
        assert_eq!(t.len(), 2);
    }

    #[test]
    fn all_kinds() {
        let t = DtdAttributeTypes::parse(
            "\n  <!ELEMENT doc (#PCDATA)>\n  <!ATTLIST doc\n    xml:lang NMTOKEN #FIXED 'en'\n    \
             kind (a|b) \"a\"\n    ref IDREF #REQUIRED\n    refs IDREFS #IMPLIED\n    \
             fmt NOTATION (gif | png) #IMPLIED\n    key ID #REQUIRED\n  >\n",
        );
        assert_eq!(t.attribute_type("doc", "xml:lang"), Some(AttributeType::NmToken));
        assert_eq!(t.attribute_type("doc", "kind"), Some(AttributeType::Enumeration));
        assert_eq!(t.attribute_type("doc", "ref"), Some(AttributeType::IdRef));
        assert_eq!(t.attribute_type("doc", "refs"), Some(AttributeType::IdRefs));
        assert_eq!(t.attribute_type("doc", "fmt"), Some(AttributeType::Notation));
        assert_eq!(t.attribute_type("doc", "key"), Some(AttributeType::Id));
    }

    #[test]
    fn comments_and_literals_are_skipped() {
        let t = DtdAttributeTypes::parse(
            "<!-- <!ATTLIST x a ID #IMPLIED> -->\
             <!ENTITY e \"<!ATTLIST y a ID #IMPLIED>\">\
             <?pi <!ATTLIST z a ID #IMPLIED>?>\
             <!ATTLIST w a ID #IMPLIED>",
        );
        assert_eq!(t.len(), 1);
        assert_eq!(t.attribute_type("w", "a"), Some(AttributeType::Id));
    }

    #[test]
    fn first_declaration_binds() {
        let t = DtdAttributeTypes::parse(
            "<!ATTLIST p id ID #IMPLIED><!ATTLIST p id CDATA #IMPLIED>",
        );
        assert_eq!(t.attribute_type("p", "id"), Some(AttributeType::Id));
    }

    #[test]
    fn broken_declaration_does_not_stop_the_scan() {
        let t = DtdAttributeTypes::parse(
            "<!ATTLIST p %atts;><!ATTLIST q id ID #IMPLIED>",
        );
        assert_eq!(t.attribute_type("q", "id"), Some(AttributeType::Id));
        assert!(t.attribute_type("p", "id").is_none());
    }

    #[test]
    fn finds_internal_subset() {
        assert_eq!(
            internal_subset("<?xml version='1.0'?><!DOCTYPE a [<!ATTLIST a id ID #IMPLIED>]><a/>"),
            Some("<!ATTLIST a id ID #IMPLIED>")
        );
        assert_eq!(internal_subset("<!DOCTYPE a SYSTEM 'a.dtd'><a/>"), None);
        assert_eq!(internal_subset("<a/>"), None);
    }

    #[test]
    fn decl_parser() {
        assert_matches!(
            attlist_decl("<!ATTLIST e a ID #IMPLIED>rest"),
            Ok(("rest", ("e", ref defs))) if defs == &[("a", AttributeType::Id)]
        );
    }
}
