//! PROPFIND request bodies and multi-status response parsing.

use super::Entry;
use crate::error::{AppError, Result};
use chrono::{DateTime, Utc};
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};
use roxmltree::{Document, Node};
use std::io::Cursor;
use url::Url;

/// Properties requested for every child.
const PROPERTIES: &[&str] = &["getcontentlength", "getlastmodified", "resourcetype"];

/// One `<response>` element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ParsedEntry {
    pub href: String,
    pub is_dir: bool,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
}

/// Children of one directory, split by kind.
#[derive(Debug, Default)]
pub(crate) struct Listing {
    pub files: Vec<Entry>,
    pub dirs: Vec<Url>,
}

/// Build the `propfind` request body.
pub(crate) fn propfind_body() -> String {
    let mut writer = Writer::new(Cursor::new(Vec::new()));

    // Writing to Vec can't fail
    let _ = writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)));

    let mut root = BytesStart::new("d:propfind");
    root.push_attribute(("xmlns:d", "DAV:"));
    let _ = writer.write_event(Event::Start(root));
    let _ = writer.write_event(Event::Start(BytesStart::new("d:prop")));
    for name in PROPERTIES {
        let _ = writer.write_event(Event::Empty(BytesStart::new(format!("d:{}", name))));
    }
    let _ = writer.write_event(Event::End(BytesEnd::new("d:prop")));
    let _ = writer.write_event(Event::End(BytesEnd::new("d:propfind")));

    String::from_utf8(writer.into_inner().into_inner()).unwrap_or_default()
}

/// Parse a multi-status document into its responses.
pub(crate) fn parse_multistatus(xml: &str) -> Result<Vec<ParsedEntry>> {
    let doc = Document::parse(xml)?;

    let entries = doc
        .descendants()
        .filter(|n| n.has_tag_name("response"))
        .map(parse_response)
        .collect();

    Ok(entries)
}

fn parse_response(response: Node<'_, '_>) -> ParsedEntry {
    let href = response
        .children()
        .find(|n| n.has_tag_name("href"))
        .and_then(|n| n.text())
        .unwrap_or_default()
        .trim()
        .to_string();

    let mut entry = ParsedEntry {
        href,
        is_dir: false,
        size: 0,
        modified: None,
    };

    let props = response
        .children()
        .filter(|n| n.has_tag_name("propstat"))
        .flat_map(|ps| ps.children().filter(|n| n.has_tag_name("prop")));

    for prop in props {
        for node in prop.children().filter(Node::is_element) {
            match node.tag_name().name() {
                "resourcetype" => {
                    if node.children().any(|c| c.has_tag_name("collection")) {
                        entry.is_dir = true;
                    }
                }
                "getcontentlength" => {
                    if let Some(size) = node.text().and_then(|t| t.trim().parse().ok()) {
                        entry.size = size;
                    }
                }
                "getlastmodified" => {
                    if let Some(ts) = node.text().and_then(parse_http_date) {
                        entry.modified = Some(ts);
                    }
                }
                _ => {}
            }
        }
    }

    entry
}

/// Parse an HTTP date (`Mon, 02 Jan 2006 15:04:05 GMT`), tolerating RFC 3339.
fn parse_http_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    DateTime::parse_from_rfc2822(raw)
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Resolve hrefs against the request URL and split files from directories.
///
/// The entry for the requested directory itself is dropped. Directories are
/// returned as absolute URLs on the request's origin with a trailing slash.
pub(crate) fn classify(request_url: &Url, entries: Vec<ParsedEntry>) -> Listing {
    let self_path = with_trailing_slash(request_url.path());
    let mut listing = Listing::default();

    for entry in entries {
        if entry.href.is_empty() {
            continue;
        }
        let Ok(resolved) = request_url.join(&entry.href) else {
            tracing::debug!(href = %entry.href, "Skipping unresolvable href");
            continue;
        };

        let path = resolved.path();
        if with_trailing_slash(path) == self_path {
            continue;
        }

        if entry.is_dir || path.ends_with('/') {
            let mut dir = request_url.clone();
            dir.set_path(&with_trailing_slash(path));
            dir.set_query(None);
            dir.set_fragment(None);
            listing.dirs.push(dir);
            continue;
        }

        listing.files.push(Entry {
            path: decode_path(path),
            size: entry.size,
            mod_time: entry.modified,
        });
    }

    listing
}

/// Normalize a user-supplied base URL into the crawl's starting directory.
pub(crate) fn start_url(base_url: &str) -> Result<Url> {
    let trimmed = format!("{}/", base_url.trim().trim_end_matches('/'));
    let url = Url::parse(&trimmed)
        .map_err(|e| AppError::Validation(format!("Invalid base URL: {}", e)))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(AppError::Validation(format!(
            "Unsupported URL scheme: {}",
            url.scheme()
        )));
    }
    Ok(url)
}

/// URL without credentials, for logs and error messages.
pub(crate) fn display_url(url: &Url) -> String {
    format!("{}{}", url.origin().ascii_serialization(), url.path())
}

fn with_trailing_slash(path: &str) -> String {
    format!("{}/", path.trim_end_matches('/'))
}

fn decode_path(path: &str) -> String {
    urlencoding::decode(path)
        .map(|p| p.into_owned())
        .unwrap_or_else(|_| path.to_string())
}
