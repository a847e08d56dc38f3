// src/ingest/parse/atom.rs
use super::tree::Element;
use super::{Channel, Entry};

/// Atom 1.0: `<feed><entry>…`.
pub(super) fn read(root: &Element<'_>) -> Channel {
    let mut out = Channel {
        title: root.first_text(&["title"]),
        ..Channel::default()
    };
    for e in root.children_named("entry") {
        if e.broken {
            out.skipped += 1;
        } else {
            out.entries.push(entry(e));
        }
    }
    out
}

fn rel<'e>(link: &'e Element<'_>) -> &'e str {
    link.attr("rel").unwrap_or("alternate")
}

fn entry(e: &Element<'_>) -> Entry {
    let links: Vec<&Element<'_>> = e.children_named("link").collect();
    let alternate = links
        .iter()
        .filter(|l| rel(l) == "alternate")
        .find_map(|l| l.attr("href"));
    let link = alternate
        .or_else(|| {
            links
                .iter()
                .filter(|l| !matches!(rel(l), "self" | "enclosure" | "replies" | "edit"))
                .find_map(|l| l.attr("href"))
        })
        .map(str::to_string);

    // out-of-line content (`src=`) has no body to offer
    let body = e
        .children_named("content")
        .filter(|c| c.attr("src").is_none())
        .find_map(Element::text)
        .or_else(|| e.first_text(&["summary"]));

    let mut asset_urls: Vec<String> = links
        .iter()
        .filter(|l| rel(l) == "enclosure")
        .filter_map(|l| l.attr("href"))
        .map(str::to_string)
        .collect();
    asset_urls.extend(e.attr_values(&["media:content", "media:thumbnail"], "url"));

    Entry {
        title: e.first_text(&["title"]),
        link,
        guid: e.first_text(&["id"]),
        timestamp: e.first_text(&["published", "updated"]),
        body,
        asset_urls,
    }
}
