//! Builders for nodes, media items, and zip archives.

use std::collections::BTreeMap;
use std::io::{Cursor, Read, Write};

use anyhow::Result;
use mediafleet_catalog::MediaItem;
use mediafleet_nodes::NodeConfig;
use serde_json::{Map, Value};
use zip::write::FileOptions;
use zip::{ZipArchive, ZipWriter};

/// A reachable node named `host-<id>`.
#[must_use]
pub fn node(id: &str) -> NodeConfig {
    NodeConfig {
        id: id.to_string(),
        name: format!("host-{id}"),
        host: "127.0.0.1".to_string(),
        port: 9000,
        scheme: "http".to_string(),
        is_up: true,
    }
}

/// A media item without metadata.
#[must_use]
pub fn media_item(node_id: &str, id: &str, name: &str, extension: &str) -> MediaItem {
    MediaItem {
        id: id.to_string(),
        node_id: node_id.to_string(),
        name: name.to_string(),
        extension: extension.to_string(),
        metadata: Map::new(),
    }
}

/// An mp3 item carrying album and artist tags.
#[must_use]
pub fn mp3_item(node_id: &str, id: &str, name: &str, album: &str, artist: &str) -> MediaItem {
    let mut item = media_item(node_id, id, name, "mp3");
    item.metadata
        .insert("album".to_string(), Value::String(album.to_string()));
    item.metadata
        .insert("artist".to_string(), Value::String(artist.to_string()));
    item
}

/// Build an in-memory zip archive from `(name, contents)` pairs.
///
/// # Errors
///
/// Returns an error if the archive cannot be written.
pub fn zip_archive(entries: &[(&str, &[u8])]) -> Result<Vec<u8>> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = FileOptions::default();
    for (name, contents) in entries {
        zip.start_file(*name, options)?;
        zip.write_all(contents)?;
    }
    Ok(zip.finish()?.into_inner())
}

/// Read every file entry of a zip archive, keyed by entry name.
///
/// # Errors
///
/// Returns an error if the bytes are not a readable zip archive.
pub fn archive_entries(bytes: &[u8]) -> Result<BTreeMap<String, Vec<u8>>> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))?;
    let mut entries = BTreeMap::new();
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        if entry.is_dir() {
            continue;
        }
        let mut contents = Vec::new();
        entry.read_to_end(&mut contents)?;
        entries.insert(entry.name().to_string(), contents);
    }
    Ok(entries)
}
