//! Maps generic record trees onto typed pages.

use crate::error::MapError;
use crate::models::{Page, PageKind, Reference};
use crate::references::extract_references;
use crate::title::{resolve, NamespaceSet, ParserContext};
use crate::tree::RecordNode;
use chrono::NaiveDateTime;
use tracing::{debug, warn};

/// Maps one top-level record.
///
/// `<siteinfo>` installs the namespace vocabulary into `ctx` and yields `None`,
/// as does any record that is not a `<page>`.
pub fn map_record(record: &RecordNode, ctx: &mut ParserContext) -> Result<Option<Page>, MapError> {
    match record.name.as_str() {
        "siteinfo" => {
            let namespaces = read_namespaces(record);
            debug!(namespaces = namespaces.len(), "Namespace vocabulary loaded");
            ctx.set_namespaces(namespaces);
            Ok(None)
        }
        "page" => map_page(record, ctx).map(Some),
        other => {
            debug!(element = other, "Ignoring unknown top-level record");
            Ok(None)
        }
    }
}

fn read_namespaces(siteinfo: &RecordNode) -> NamespaceSet {
    let declarations = siteinfo
        .child("namespaces")
        .first()
        .map(|ns| ns.child("namespace"))
        .into_iter()
        .flat_map(|nodes| nodes.iter())
        .filter_map(|node| {
            let key = node.attr("key").and_then(|k| k.trim().parse::<i32>().ok());
            if key.is_none() {
                warn!(name = %node.content, "Namespace declaration without a numeric key");
            }
            key.map(|k| (k, node.content.trim().to_string()))
        });
    NamespaceSet::from_declarations(declarations)
}

fn map_page(record: &RecordNode, ctx: &ParserContext) -> Result<Page, MapError> {
    let raw_title = record
        .text_at(&["title"])
        .ok_or(MapError::MissingField("title"))?;
    let namespaces = ctx
        .namespaces()
        .ok_or_else(|| MapError::NoSiteinfo(raw_title.to_string()))?;

    let raw_id = record.text_at(&["id"]).ok_or(MapError::MissingField("id"))?;
    let id = raw_id
        .trim()
        .parse::<u64>()
        .map_err(|_| MapError::InvalidId(raw_id.to_string()))?;

    // Full-history dumps repeat <revision>; the last one is current.
    let revision = record
        .child("revision")
        .last()
        .ok_or(MapError::MissingField("revision"))?;
    let raw_timestamp = revision
        .text_at(&["timestamp"])
        .ok_or(MapError::MissingField("timestamp"))?;
    let last_edit = parse_timestamp(raw_timestamp)?;

    let kind = match record.child("redirect").first() {
        Some(redirect) => {
            let target = redirect.attr("title").unwrap_or_default();
            PageKind::Redirect {
                target: resolve(namespaces, target),
            }
        }
        None => {
            let text = revision.text_at(&["text"]).unwrap_or_default();
            PageKind::Content {
                references: resolve_references(namespaces, text),
                text: text.to_string(),
            }
        }
    };

    Ok(Page {
        id,
        location: resolve(namespaces, raw_title),
        last_edit,
        kind,
    })
}

/// Extracts and resolves links, dropping empty and namespace-only targets.
pub fn resolve_references(namespaces: &NamespaceSet, text: &str) -> Vec<Reference> {
    let (_, raw) = extract_references(text);
    raw.into_iter()
        .filter(|(target, _)| !target.trim().is_empty())
        .map(|(target, offset)| Reference {
            target: resolve(namespaces, &target),
            offset,
        })
        .filter(|r| !r.target.title.is_empty())
        .collect()
}

/// Parses `2024-01-15T10:30:00Z`-style stamps; the zone marker is dropped.
pub fn parse_timestamp(raw: &str) -> Result<NaiveDateTime, MapError> {
    let trimmed = raw.trim();
    let local = trimmed
        .strip_suffix('Z')
        .or_else(|| trimmed.strip_suffix('z'))
        .unwrap_or(trimmed);
    NaiveDateTime::parse_from_str(local, "%Y-%m-%dT%H:%M:%S%.f")
        .map_err(|_| MapError::InvalidTimestamp(raw.to_string()))
}
