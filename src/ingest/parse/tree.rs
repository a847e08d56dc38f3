// src/ingest/parse/tree.rs
//! Lenient element tree over a feed document.
//!
//! Feeds routinely embed raw HTML in text elements, so end tags are matched
//! loosely: an end tag closes the nearest open element with the same name and
//! implicitly closes anything still open inside it (`<br>` in a description).
//! Dangling end tags are ignored. Elements that were open when the reader
//! reported an error, or that were never closed, are marked `broken`; callers
//! drop broken entries and keep the rest.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

const CDATA_OPEN: &str = "<![CDATA[";
const CDATA_CLOSE: &str = "]]>";

/// Short names for the namespaces feeds actually mix in. The namespace of the
/// root element is always unprefixed.
fn ns_alias(uri: &str) -> Option<&'static str> {
    match uri.trim().trim_end_matches(['/', '#']) {
        "http://www.w3.org/2005/Atom" => Some("atom"),
        "http://purl.org/rss/1.0/modules/content" => Some("content"),
        "http://purl.org/dc/elements/1.1" => Some("dc"),
        "http://search.yahoo.com/mrss" => Some("media"),
        "http://www.w3.org/1999/02/22-rdf-syntax-ns" => Some("rdf"),
        "http://www.w3.org/1999/xhtml" => Some("xhtml"),
        "http://purl.org/rss/1.0" | "http://backend.userland.com/rss2" => Some(""),
        _ => None,
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Element<'a> {
    /// `alias:local` for known namespaces, plain `local` for the document's
    /// own vocabulary, otherwise the name as written.
    pub name: String,
    attrs: Vec<(String, String)>,
    pub children: Vec<Element<'a>>,
    /// Inner source text, untouched.
    raw: &'a str,
    pub broken: bool,
}

impl<'a> Element<'a> {
    pub fn children_named<'s>(&'s self, name: &'s str) -> impl Iterator<Item = &'s Element<'a>> {
        self.children.iter().filter(move |c| c.name == name)
    }

    pub fn child<'s>(&'s self, name: &'s str) -> Option<&'s Element<'a>> {
        self.children_named(name).next()
    }

    /// Attribute by name; `about` also matches `rdf:about`. Trimmed, never empty.
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == key || k.rsplit(':').next() == Some(key))
            .map(|(_, v)| v.trim())
            .filter(|v| !v.is_empty())
    }

    /// Inner content as markup: CDATA sections verbatim, entities decoded
    /// everywhere else, child tags kept as written.
    pub fn markup(&self) -> String {
        let mut out = String::with_capacity(self.raw.len());
        let mut rest = self.raw;
        while let Some(start) = rest.find(CDATA_OPEN) {
            out.push_str(&html_escape::decode_html_entities(&rest[..start]));
            let body = &rest[start + CDATA_OPEN.len()..];
            match body.find(CDATA_CLOSE) {
                Some(end) => {
                    out.push_str(&body[..end]);
                    rest = &body[end + CDATA_CLOSE.len()..];
                }
                None => {
                    out.push_str(body);
                    return out;
                }
            }
        }
        out.push_str(&html_escape::decode_html_entities(rest));
        out
    }

    /// Trimmed markup, `None` when blank.
    pub fn text(&self) -> Option<String> {
        let markup = self.markup();
        let t = markup.trim();
        (!t.is_empty()).then(|| t.to_string())
    }

    /// First non-blank child text, trying `names` in priority order.
    pub fn first_text(&self, names: &[&str]) -> Option<String> {
        names
            .iter()
            .find_map(|n| self.children_named(n).find_map(Element::text))
    }

    /// `key` attribute of every child named in `names`, grouped by name.
    pub fn attr_values(&self, names: &[&str], key: &str) -> Vec<String> {
        names
            .iter()
            .flat_map(|n| self.children_named(n))
            .filter_map(|c| c.attr(key))
            .map(str::to_string)
            .collect()
    }
}

#[derive(Debug)]
pub(crate) struct Document<'a> {
    pub root: Option<Element<'a>>,
    /// Error that stopped the reader before the end of input.
    pub fatal: Option<String>,
}

struct Open<'a> {
    el: Element<'a>,
    qname: String,
    inner_start: usize,
    /// Namespace declarations made on this element; `""` is the default.
    scope: Vec<(String, String)>,
}

struct Builder<'a> {
    xml: &'a str,
    stack: Vec<Open<'a>>,
    root: Option<Element<'a>>,
    root_ns: Option<String>,
}

impl<'a> Builder<'a> {
    fn open(&mut self, e: &BytesStart<'_>, inner_start: usize) -> Open<'a> {
        let mut attrs = Vec::new();
        let mut scope = Vec::new();
        let mut attributes = e.attributes();
        attributes.with_checks(false);
        for attr in attributes.flatten() {
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr
                .unescape_value()
                .map(|v| v.into_owned())
                .unwrap_or_else(|_| String::from_utf8_lossy(&attr.value).into_owned());
            if key == "xmlns" {
                scope.push((String::new(), value));
            } else if let Some(prefix) = key.strip_prefix("xmlns:") {
                scope.push((prefix.to_string(), value));
            } else {
                attrs.push((key, value));
            }
        }

        let qname = String::from_utf8_lossy(e.name().as_ref()).into_owned();
        let (prefix, local) = match qname.split_once(':') {
            Some((p, l)) => (p, l),
            None => ("", qname.as_str()),
        };
        let uri = scope
            .iter()
            .chain(self.stack.iter().rev().flat_map(|o| o.scope.iter()))
            .find(|(p, _)| p == prefix)
            .map(|(_, u)| u.clone());
        if self.stack.is_empty() && self.root.is_none() {
            self.root_ns = uri.clone();
        }

        let name = match uri.as_deref() {
            Some(u) if Some(u) == self.root_ns.as_deref() => local.to_string(),
            Some(u) => match ns_alias(u) {
                Some("") => local.to_string(),
                Some(alias) => format!("{alias}:{local}"),
                None => qname.clone(),
            },
            None => qname.clone(),
        };

        Open {
            el: Element {
                name,
                attrs,
                children: Vec::new(),
                raw: "",
                broken: false,
            },
            qname,
            inner_start,
            scope,
        }
    }

    fn close(&mut self, open: Open<'a>, inner_end: usize) {
        let mut el = open.el;
        el.raw = self.xml.get(open.inner_start..inner_end).unwrap_or_default();
        self.attach(el);
    }

    fn attach(&mut self, el: Element<'a>) {
        match self.stack.last_mut() {
            Some(parent) => parent.el.children.push(el),
            None if self.root.is_none() => self.root = Some(el),
            None => {}
        }
    }

    /// Close the nearest open element named `qname` and everything above it.
    fn end(&mut self, qname: &str, at: usize) {
        let Some(depth) = self.stack.iter().rposition(|o| o.qname == qname) else {
            return;
        };
        while self.stack.len() > depth {
            if let Some(open) = self.stack.pop() {
                self.close(open, at);
            }
        }
    }

    fn poison_open(&mut self) {
        for open in &mut self.stack {
            open.el.broken = true;
        }
    }
}

/// Read the whole document. Never fails: recoverable reader errors poison
/// the elements open at that point, unrecoverable ones stop reading and are
/// reported in [`Document::fatal`].
pub(crate) fn build(xml: &str) -> Document<'_> {
    let mut reader = Reader::from_str(xml);
    let config = reader.config_mut();
    config.check_end_names = false;
    config.allow_unmatched_ends = true;

    let mut b = Builder {
        xml,
        stack: Vec::new(),
        root: None,
        root_ns: None,
    };
    let mut fatal = None;

    loop {
        let before = reader.buffer_position() as usize;
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let open = b.open(&e, reader.buffer_position() as usize);
                b.stack.push(open);
            }
            Ok(Event::Empty(e)) => {
                let at = reader.buffer_position() as usize;
                let open = b.open(&e, at);
                b.close(open, at);
            }
            Ok(Event::End(e)) => {
                let qname = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                b.end(&qname, before);
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(quick_xml::Error::IllFormed(_)) if reader.buffer_position() as usize > before => {
                b.poison_open();
            }
            Err(e) => {
                b.poison_open();
                fatal = Some(e.to_string());
                break;
            }
        }
    }

    // unclosed at end of input
    b.poison_open();
    while let Some(open) = b.stack.pop() {
        b.close(open, xml.len());
    }

    Document {
        root: b.root,
        fatal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root(xml: &str) -> Element<'_> {
        build(xml).root.unwrap()
    }

    #[test]
    fn html_inside_text_elements_is_kept_as_markup() {
        let r = root("<item><description>Plain <b>bold</b> a <br> b</description><title>t</title></item>");
        assert_eq!(
            r.first_text(&["description"]).as_deref(),
            Some("Plain <b>bold</b> a <br> b")
        );
        assert_eq!(r.first_text(&["title"]).as_deref(), Some("t"));
        assert!(!r.broken);
    }

    #[test]
    fn escaped_and_cdata_content_decode_to_markup() {
        let r = root("<i><a>&lt;p&gt;x &amp;amp; y&lt;/p&gt;</a><b><![CDATA[<p>&amp;</p>]]> tail &gt;</b></i>");
        assert_eq!(r.first_text(&["a"]).as_deref(), Some("<p>x &amp; y</p>"));
        assert_eq!(r.first_text(&["b"]).as_deref(), Some("<p>&amp;</p> tail >"));
    }

    #[test]
    fn namespaces_are_aliased_relative_to_the_root() {
        let r = root(
            r#"<rss xmlns:atom="http://www.w3.org/2005/Atom" xmlns:c="http://purl.org/rss/1.0/modules/content/">
                <link>l</link><atom:link href="h" rel="self"/><c:encoded>e</c:encoded><x:y>z</x:y></rss>"#,
        );
        let names: Vec<_> = r.children.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["link", "atom:link", "content:encoded", "x:y"]);
        assert_eq!(r.child("atom:link").and_then(|l| l.attr("href")), Some("h"));

        let atom = root(r#"<a:feed xmlns:a="http://www.w3.org/2005/Atom"><a:entry/></a:feed>"#);
        assert_eq!(atom.name, "feed");
        assert_eq!(atom.children[0].name, "entry");
    }

    #[test]
    fn dangling_end_tags_are_ignored_and_unclosed_elements_are_broken() {
        let doc = build("<r><a>1</b></a><c>cut");
        let r = doc.root.unwrap();
        assert!(doc.fatal.is_none());
        assert_eq!(r.first_text(&["a"]).as_deref(), Some("1</b>"));
        assert!(!r.children[0].broken);
        assert!(r.children[1].broken);
        assert!(r.broken);
    }

    #[test]
    fn recoverable_errors_poison_only_open_elements() {
        let doc = build("<r><ok>1</ok><bad><!DOCTYPE></bad><ok>2</ok></r>");
        let r = doc.root.unwrap();
        assert!(doc.fatal.is_none());
        let broken: Vec<_> = r.children.iter().map(|c| c.broken).collect();
        assert_eq!(broken, vec![false, true, false]);
    }

    #[test]
    fn syntax_errors_stop_the_reader() {
        let doc = build("<r><ok>1</ok><!-- never closed");
        assert!(doc.fatal.is_some());
        let r = doc.root.unwrap();
        assert_eq!(r.children.len(), 1);
        assert!(!r.children[0].broken);
    }
}
