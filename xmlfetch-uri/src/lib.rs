//! URI arithmetic for document references.
//!
//! Everything here is pure apart from [`expand_against_working_dir`], which
//! reads the process working directory.

use std::borrow::Cow;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UriError {
    #[error("cannot resolve {relative:?} against base {base:?}: {reason}")]
    Unresolvable {
        relative: String,
        base: Option<String>,
        reason: url::ParseError,
    },
}

impl UriError {
    fn unresolvable(relative: &str, base: Option<&str>, reason: url::ParseError) -> UriError {
        UriError::Unresolvable {
            relative: relative.to_string(),
            base: base.map(str::to_string),
            reason,
        }
    }
}

/// An absolute URI, as produced by [`absolutize`].
///
/// The text is kept separately from the parsed form so that a base handed
/// back unchanged keeps its exact spelling.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AbsoluteUri {
    text: String,
    url: Url,
}

impl AbsoluteUri {
    pub fn parse(text: &str) -> Result<AbsoluteUri, UriError> {
        absolutize(text, None)
    }

    fn from_url(url: Url) -> AbsoluteUri {
        AbsoluteUri {
            text: url.as_str().to_string(),
            url,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn scheme(&self) -> &str {
        self.url.scheme()
    }

    /// The `file:` URI for an absolute path; `None` for a relative one.
    pub fn from_file_path(path: &Path) -> Option<AbsoluteUri> {
        Url::from_file_path(path).ok().map(AbsoluteUri::from_url)
    }

    /// The local path for `file:` URIs.
    pub fn to_file_path(&self) -> Option<PathBuf> {
        if self.url.scheme() == "file" {
            self.url.to_file_path().ok()
        } else {
            None
        }
    }

    pub fn into_string(self) -> String {
        self.text
    }
}

impl fmt::Display for AbsoluteUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Resolve `relative` against `base`.
///
/// With no base the reference must be absolute already, or be expandable
/// against the working directory. The expansion is attempted once.
pub fn absolutize(relative: &str, base: Option<&str>) -> Result<AbsoluteUri, UriError> {
    let escaped = escape_spaces(relative);
    let Some(base) = base else {
        return absolutize_without_base(relative, &escaped);
    };
    let escaped_base = escape_spaces(base);
    let base_url = Url::parse(&escaped_base)
        .map_err(|e| UriError::unresolvable(relative, Some(base), e))?;
    if escaped.is_empty() {
        return Ok(AbsoluteUri {
            text: escaped_base.into_owned(),
            url: base_url,
        });
    }
    let joined = base_url
        .join(&escaped)
        .map_err(|e| UriError::unresolvable(relative, Some(base), e))?;
    // a literal "%25" in the input is a real escaped percent sign, not an
    // artefact of resolution
    if relative.contains("%25") || base.contains("%25") {
        return Ok(AbsoluteUri::from_url(joined));
    }
    match collapse_double_escapes(joined.as_str()) {
        Cow::Borrowed(_) => Ok(AbsoluteUri::from_url(joined)),
        Cow::Owned(repaired) => {
            let url = Url::parse(&repaired)
                .map_err(|e| UriError::unresolvable(relative, Some(base), e))?;
            Ok(AbsoluteUri {
                text: repaired,
                url,
            })
        }
    }
}

fn absolutize_without_base(relative: &str, escaped: &str) -> Result<AbsoluteUri, UriError> {
    let err = match Url::parse(escaped) {
        Ok(url) => return Ok(AbsoluteUri::from_url(url)),
        Err(err) => err,
    };
    match expand_against_working_dir(escaped) {
        Some(expanded) if expanded != escaped => {
            tracing::debug!(relative, %expanded, "expanded against working directory");
            Url::parse(&expanded)
                .map(AbsoluteUri::from_url)
                .map_err(|_| UriError::unresolvable(relative, None, err))
        }
        _ => Err(UriError::unresolvable(relative, None, err)),
    }
}

/// Resolve `reference` against a `file:` URI for the working directory.
///
/// Returns `None` when there is no usable working directory.
pub fn expand_against_working_dir(reference: &str) -> Option<String> {
    let cwd = std::env::current_dir().ok()?;
    let dir = Url::from_directory_path(cwd).ok()?;
    dir.join(reference).ok().map(String::from)
}

/// True when `reference` parses as a URI carrying its own scheme.
pub fn is_absolute(reference: &str) -> bool {
    Url::parse(&escape_spaces(reference)).is_ok()
}

/// Replace every literal space with `%20`.
pub fn escape_spaces(s: &str) -> Cow<'_, str> {
    let Some(first) = s.find(' ') else {
        return Cow::Borrowed(s);
    };
    let mut out = String::with_capacity(s.len() + 8);
    out.push_str(&s[..first]);
    let mut rest = &s[first..];
    while let Some(pos) = rest.find(' ') {
        out.push_str(&rest[..pos]);
        out.push_str("%20");
        rest = &rest[pos + 1..];
    }
    out.push_str(rest);
    Cow::Owned(out)
}

/// Turn `%25XX` back into `%XX`, where `XX` are hex digits.
///
/// A single left-to-right pass; the output is not rescanned, so `%252520`
/// becomes `%2520`.
pub fn collapse_double_escapes(s: &str) -> Cow<'_, str> {
    let bytes = s.as_bytes();
    let is_double = |i: usize| {
        bytes.len() >= i + 5
            && &bytes[i..i + 3] == b"%25"
            && bytes[i + 3].is_ascii_hexdigit()
            && bytes[i + 4].is_ascii_hexdigit()
    };
    if !(0..bytes.len()).any(is_double) {
        return Cow::Borrowed(s);
    }
    let mut out = String::with_capacity(s.len());
    let mut i = 0;
    let mut copied = 0;
    while i < bytes.len() {
        if is_double(i) {
            out.push_str(&s[copied..i]);
            out.push('%');
            out.push_str(&s[i + 3..i + 5]);
            i += 5;
            copied = i;
        } else {
            i += 1;
        }
    }
    out.push_str(&s[copied..]);
    Cow::Owned(out)
}

/// A reference split at its first `#`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Fragment<'a> {
    pub uri: &'a str,
    /// Everything after the first `#`, if there was one. May be empty.
    pub fragment: Option<&'a str>,
}

impl<'a> Fragment<'a> {
    /// The element ID named by the fragment; `None` when absent or empty.
    pub fn id(&self) -> Option<&'a str> {
        self.fragment.filter(|f| !f.is_empty())
    }

    /// Reassemble the original reference.
    pub fn rejoin(&self) -> String {
        match self.fragment {
            Some(fragment) => format!("{}#{}", self.uri, fragment),
            None => self.uri.to_string(),
        }
    }
}

pub fn split_fragment(href: &str) -> Fragment<'_> {
    match href.split_once('#') {
        Some((uri, fragment)) => Fragment {
            uri,
            fragment: Some(fragment),
        },
        None => Fragment {
            uri: href,
            fragment: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn empty_relative_is_base() {
        for base in [
            "http://example.com",
            "http://Example.com/a/../b.xml",
            "file:///tmp/doc.xml",
            "urn:isbn:0451450523",
        ] {
            assert_eq!(absolutize("", Some(base)).unwrap().as_str(), base);
        }
    }

    #[test]
    fn relative_against_base() {
        let uri = absolutize("other.xml", Some("http://example.com/docs/main.xml")).unwrap();
        assert_eq!(uri.as_str(), "http://example.com/docs/other.xml");
        let uri = absolutize("../up.xml", Some("file:///a/b/c.xml")).unwrap();
        assert_eq!(uri.as_str(), "file:///a/up.xml");
        let uri = absolutize("http://elsewhere.org/x", Some("file:///a/b/c.xml")).unwrap();
        assert_eq!(uri.as_str(), "http://elsewhere.org/x");
    }

    #[test]
    fn spaces_are_escaped() {
        let uri = absolutize("my doc.xml", Some("file:///tmp/some dir/base.xml")).unwrap();
        assert_eq!(uri.as_str(), "file:///tmp/some%20dir/my%20doc.xml");
        let uri = absolutize("http://example.com/a b c", None).unwrap();
        assert_eq!(uri.as_str(), "http://example.com/a%20b%20c");
    }

    #[test]
    fn spaces_never_cause_syntax_errors() {
        for rel in [" ", "a b", " lead", "trail ", "x  y/z w.xml"] {
            assert!(absolutize(rel, Some("http://example.com/dir/")).is_ok(), "{rel:?}");
        }
    }

    #[test]
    fn escaped_input_is_not_double_escaped() {
        let uri = absolutize("a%20b.xml", Some("http://example.com/dir/")).unwrap();
        assert_eq!(uri.as_str(), "http://example.com/dir/a%20b.xml");
    }

    #[test]
    fn literal_percent_25_survives() {
        let uri = absolutize("a%2520b.xml", Some("http://example.com/dir/")).unwrap();
        assert_eq!(uri.as_str(), "http://example.com/dir/a%2520b.xml");
    }

    #[test]
    fn collapse() {
        assert_eq!(collapse_double_escapes("a%2520b"), "a%20b");
        assert_eq!(collapse_double_escapes("%2541%2542"), "%41%42");
        assert_eq!(collapse_double_escapes("%252520"), "%2520");
        assert_eq!(collapse_double_escapes("%25zz"), "%25zz");
        assert_eq!(collapse_double_escapes("tail%252"), "tail%252");
        assert_matches!(collapse_double_escapes("plain"), Cow::Borrowed("plain"));
    }

    #[test]
    fn escape() {
        assert_eq!(escape_spaces("a b  c"), "a%20b%20%20c");
        assert_matches!(escape_spaces("abc"), Cow::Borrowed("abc"));
    }

    #[test]
    fn absolute_without_base() {
        let uri = absolutize("http://example.com/x.xml", None).unwrap();
        assert_eq!(uri.as_str(), "http://example.com/x.xml");
        assert_eq!(uri.scheme(), "http");
        assert!(uri.to_file_path().is_none());
    }

    #[test]
    fn relative_without_base_uses_working_dir() {
        let uri = absolutize("some/doc.xml", None).unwrap();
        assert_eq!(uri.scheme(), "file");
        assert!(uri.as_str().ends_with("/some/doc.xml"), "{uri}");
        let cwd = std::env::current_dir().unwrap();
        assert_eq!(uri.to_file_path().unwrap(), cwd.join("some").join("doc.xml"));
    }

    #[test]
    fn bad_base() {
        let err = absolutize("x.xml", Some("::not a base")).unwrap_err();
        assert_matches!(
            err,
            UriError::Unresolvable { ref relative, base: Some(ref base), .. }
                if relative == "x.xml" && base == "::not a base"
        );
    }

    #[test]
    fn split() {
        let f = split_fragment("doc.xml#sec1");
        assert_eq!(f.uri, "doc.xml");
        assert_eq!(f.id(), Some("sec1"));
        let f = split_fragment("doc.xml#a#b");
        assert_eq!(f.uri, "doc.xml");
        assert_eq!(f.id(), Some("a#b"));
        let f = split_fragment("doc.xml#");
        assert_eq!(f.fragment, Some(""));
        assert_eq!(f.id(), None);
        assert_eq!(split_fragment("doc.xml").id(), None);
    }

    #[test]
    fn split_rejoin_round_trip() {
        for href in ["", "#", "#x", "a.xml", "a.xml#", "a.xml#b", "http://h/p?q#f#g", "##"] {
            assert_eq!(split_fragment(href).rejoin(), href);
        }
    }

    #[test]
    fn absolute_check() {
        assert!(is_absolute("file:///x"));
        assert!(is_absolute("urn:a:b"));
        assert!(!is_absolute("x/y.xml"));
        assert!(!is_absolute(""));
    }
}
