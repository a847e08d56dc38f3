// src/ingest/parse/rdf.rs
use super::tree::Element;
use super::{Channel, Entry};

// RSS 1.0 keeps <item> siblings of <channel> directly under <rdf:RDF>.
pub(super) fn read(root: &Element<'_>) -> Channel {
    let mut out = Channel {
        title: root
            .child("channel")
            .and_then(|c| c.first_text(&["title"])),
        ..Channel::default()
    };
    for item in root.children_named("item") {
        if item.broken {
            out.skipped += 1;
        } else {
            out.entries.push(entry(item));
        }
    }
    out
}

fn entry(item: &Element<'_>) -> Entry {
    let about = item.attr("about").map(str::to_string);
    Entry {
        title: item.first_text(&["title"]),
        link: item.first_text(&["link"]).or_else(|| about.clone()),
        guid: about,
        timestamp: item.first_text(&["dc:date"]),
        body: item.first_text(&["content:encoded", "description"]),
        asset_urls: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::super::tree::build;
    use super::*;

    #[test]
    fn items_live_beside_the_channel() {
        let xml = r#"<?xml version="1.0"?>
<rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#"
         xmlns="http://purl.org/rss/1.0/"
         xmlns:dc="http://purl.org/dc/elements/1.1/">
  <channel rdf:about="https://cert.test/">
    <title>CERT notes</title>
    <items><rdf:Seq><rdf:li rdf:resource="https://cert.test/a"/></rdf:Seq></items>
  </channel>
  <item rdf:about="https://cert.test/a">
    <title>Note A</title>
    <dc:date>2024-05-01T09:00:00+02:00</dc:date>
    <description>desc</description>
  </item>
</rdf:RDF>"#;
        let ch = read(&build(xml).root.unwrap());
        assert_eq!(ch.title.as_deref(), Some("CERT notes"));
        assert_eq!(ch.entries.len(), 1);
        let e = &ch.entries[0];
        assert_eq!(e.title.as_deref(), Some("Note A"));
        assert_eq!(e.link.as_deref(), Some("https://cert.test/a"));
        assert_eq!(e.timestamp.as_deref(), Some("2024-05-01T09:00:00+02:00"));
        assert_eq!(e.body.as_deref(), Some("desc"));
    }
}
