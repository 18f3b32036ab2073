use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use satsuma_core::{FileEntry, sanitize_segment};

/// One node of the catalog's track tree, as the API serves it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TrackNode {
    Folder {
        title: String,
        #[serde(default)]
        children: Vec<TrackNode>,
    },
    File {
        title: String,
        #[serde(rename = "downloadUrl", default)]
        download_url: Option<String>,
    },
}

/// Which files of a tree an observer asked for.
#[derive(Debug, Clone)]
pub enum Selection {
    All,
    Urls(HashSet<String>),
}

impl Selection {
    fn accepts(&self, url: &str) -> bool {
        match self {
            Selection::All => true,
            Selection::Urls(urls) => urls.contains(url),
        }
    }
}

/// Catalog ids are short opaque codes; anything outside this alphabet is
/// treated as a malformed identifier and never reaches the API.
pub fn valid_catalog_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 64
        && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Flattens a track tree into download entries. Destination paths are
/// `item_id/<folder path>/<title>` with each tree-derived segment run
/// through the filename sanitizer; nodes without a download URL are
/// navigation-only and skipped.
pub fn flatten_tree(nodes: &[TrackNode], item_id: &str, selection: &Selection) -> Vec<FileEntry> {
    let mut files = Vec::new();
    for node in nodes {
        visit(node, item_id, selection, &mut files);
    }
    files
}

fn visit(node: &TrackNode, prefix: &str, selection: &Selection, out: &mut Vec<FileEntry>) {
    match node {
        TrackNode::Folder { title, children } => {
            let segment = sanitize_segment(title);
            let path = if segment.is_empty() {
                prefix.to_string()
            } else {
                format!("{prefix}/{segment}")
            };
            for child in children {
                visit(child, &path, selection, out);
            }
        }
        TrackNode::File { title, download_url } => {
            let Some(url) = download_url else {
                return;
            };
            if !selection.accepts(url) {
                return;
            }
            let segment = sanitize_segment(title);
            if segment.is_empty() {
                return;
            }
            out.push(FileEntry::new(url.clone(), format!("{prefix}/{segment}")));
        }
    }
}
