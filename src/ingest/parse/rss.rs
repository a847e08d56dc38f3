// src/ingest/parse/rss.rs
use super::tree::Element;
use super::{Channel, Entry};

/// RSS 0.9x / 2.0: `<rss><channel><item>…`.
pub(super) fn read(root: &Element<'_>) -> Channel {
    let Some(channel) = root.child("channel") else {
        return Channel::default();
    };
    let mut out = Channel {
        title: channel.first_text(&["title"]),
        ..Channel::default()
    };
    for item in channel.children_named("item") {
        if item.broken {
            out.skipped += 1;
        } else {
            out.entries.push(entry(item));
        }
    }
    out
}

fn entry(item: &Element<'_>) -> Entry {
    let guid = item
        .children_named("guid")
        .find_map(|g| g.text().map(|v| (g, v)));
    let link = item
        .first_text(&["link"])
        .or_else(|| guid.as_ref().and_then(|(g, v)| permalink(g, v)));

    Entry {
        title: item.first_text(&["title"]),
        link,
        guid: guid.map(|(_, v)| v),
        timestamp: item.first_text(&["pubDate", "dc:date"]),
        body: item.first_text(&["content:encoded", "description"]),
        asset_urls: item.attr_values(&["enclosure", "media:content", "media:thumbnail"], "url"),
    }
}

/// A `<guid>` doubles as the link unless it says otherwise or isn't a URL.
fn permalink(guid: &Element<'_>, value: &str) -> Option<String> {
    let explicit_false = guid
        .attr("isPermaLink")
        .is_some_and(|p| p.eq_ignore_ascii_case("false"));
    let looks_like_url = value.starts_with("http://") || value.starts_with("https://");
    (!explicit_false && looks_like_url).then(|| value.to_string())
}
