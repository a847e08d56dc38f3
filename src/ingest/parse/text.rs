// src/ingest/parse/text.rs
//! Byte decoding, entity scrubbing and timestamp parsing shared by all dialects.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use time::format_description::well_known::{Rfc2822, Rfc3339};
use time::OffsetDateTime;

static RE_DECL_ENCODING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)<\?xml[^>]*\bencoding\s*=\s*["']([A-Za-z0-9._-]+)["']"#)
        .expect("static regex")
});

static RE_ENTITY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"&(#[0-9]+;|#[xX][0-9a-fA-F]+;|[A-Za-z][A-Za-z0-9]*;)?").expect("static regex")
});

const CDATA_OPEN: &str = "<![CDATA[";
const CDATA_CLOSE: &str = "]]>";

// windows-1252 code points for 0x80..=0x9F; undefined slots map to the C1 control.
const CP1252_HIGH: [char; 32] = [
    '\u{20AC}', '\u{0081}', '\u{201A}', '\u{0192}', '\u{201E}', '\u{2026}', '\u{2020}', '\u{2021}',
    '\u{02C6}', '\u{2030}', '\u{0160}', '\u{2039}', '\u{0152}', '\u{008D}', '\u{017D}', '\u{008F}',
    '\u{0090}', '\u{2018}', '\u{2019}', '\u{201C}', '\u{201D}', '\u{2022}', '\u{2013}', '\u{2014}',
    '\u{02DC}', '\u{2122}', '\u{0161}', '\u{203A}', '\u{0153}', '\u{009D}', '\u{017E}', '\u{0178}',
];

/// Turn feed bytes into text: BOM stripped, UTF-8 if valid, else the declared
/// single-byte encoding, else lossy UTF-8.
pub fn decode(bytes: &[u8]) -> String {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    if let Ok(s) = std::str::from_utf8(bytes) {
        return s.to_string();
    }

    let head_len = bytes.len().min(256);
    let head = String::from_utf8_lossy(&bytes[..head_len]);
    let declared = RE_DECL_ENCODING
        .captures(&head)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_ascii_lowercase());

    match declared.as_deref() {
        Some("iso-8859-1" | "iso8859-1" | "latin1" | "latin-1" | "l1" | "windows-1252" | "cp1252") => {
            bytes.iter().map(|&b| cp1252_char(b)).collect()
        }
        _ => String::from_utf8_lossy(bytes).into_owned(),
    }
}

fn cp1252_char(b: u8) -> char {
    match b {
        0x80..=0x9F => CP1252_HIGH[(b - 0x80) as usize],
        _ => b as char,
    }
}

/// Make HTML-flavoured markup acceptable to an XML parser.
///
/// Outside CDATA sections: bare `&` becomes `&amp;`, HTML named entities are
/// replaced by their characters, unknown names are escaped literally. Numeric
/// references and the five XML entities are left alone.
pub fn scrub_entities(xml: &str) -> String {
    let mut out = String::with_capacity(xml.len() + 64);
    let mut rest = xml;
    while let Some(start) = rest.find(CDATA_OPEN) {
        out.push_str(&scrub_segment(&rest[..start]));
        let after = &rest[start..];
        match after.find(CDATA_CLOSE) {
            Some(end) => {
                let end = end + CDATA_CLOSE.len();
                out.push_str(&after[..end]);
                rest = &after[end..];
            }
            None => {
                // unterminated; let the XML parser report it
                out.push_str(after);
                return out;
            }
        }
    }
    out.push_str(&scrub_segment(rest));
    out
}

fn scrub_segment(s: &str) -> String {
    RE_ENTITY
        .replace_all(s, |caps: &regex::Captures<'_>| {
            let Some(body) = caps.get(1).map(|m| m.as_str()) else {
                return "&amp;".to_string();
            };
            if body.starts_with('#') {
                return format!("&{body}");
            }
            let name = &body[..body.len() - 1];
            if matches!(name, "amp" | "lt" | "gt" | "quot" | "apos") {
                return format!("&{body}");
            }
            let entity = format!("&{body}");
            let decoded = html_escape::decode_html_entities(&entity);
            if decoded == entity {
                format!("&amp;{body}")
            } else {
                html_escape::encode_text(&decoded).into_owned()
            }
        })
        .into_owned()
}

/// Best-effort timestamp parsing, truncated to whole seconds.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(t) = OffsetDateTime::parse(s, &Rfc2822) {
        return DateTime::from_timestamp(t.unix_timestamp(), 0);
    }
    if let Ok(t) = OffsetDateTime::parse(s, &Rfc3339) {
        return DateTime::from_timestamp(t.unix_timestamp(), 0);
    }
    // chrono is more lenient with obsolete zone names ("EST", "GMT") and offsets
    if let Ok(t) = DateTime::parse_from_rfc2822(s) {
        return DateTime::from_timestamp(t.timestamp(), 0);
    }
    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return DateTime::from_timestamp(t.timestamp(), 0);
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(t) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(t.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|t| t.and_utc())
}
