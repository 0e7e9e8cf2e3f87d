//! Merge per-node archives into one.

use std::collections::BTreeMap;
use std::io::{Cursor, Read, Write};

use tracing::debug;
use zip::write::FileOptions;
use zip::{ZipArchive, ZipWriter};

use crate::error::{DownloadError, DownloadResult};

enum Entry {
    Directory,
    File(Vec<u8>),
}

/// Assemble the final archive from each node's archive, keyed by node id.
///
/// A single contribution is already in the final format and is returned
/// unchanged. Otherwise every entry is copied into a fresh archive. Nodes are
/// read in ascending id order and an entry name seen twice keeps the later
/// node's contents, so each name is written once.
///
/// # Errors
///
/// Returns [`DownloadError::Empty`] when nothing was contributed, or an
/// archive error if a node archive cannot be read or the result written.
pub fn merge_archives(mut parts: BTreeMap<String, Vec<u8>>) -> DownloadResult<Vec<u8>> {
    if parts.len() == 1 {
        if let Some((_, bytes)) = parts.pop_first() {
            return Ok(bytes);
        }
    }
    if parts.is_empty() {
        return Err(DownloadError::Empty);
    }

    let mut entries: BTreeMap<String, Entry> = BTreeMap::new();
    for (node_id, bytes) in &parts {
        let mut archive = ZipArchive::new(Cursor::new(bytes.as_slice()))
            .map_err(|err| DownloadError::archive("merge.open", Some(node_id), err))?;
        for index in 0..archive.len() {
            let mut file = archive
                .by_index(index)
                .map_err(|err| DownloadError::archive("merge.read_entry", Some(node_id), err))?;
            let name = file.name().to_string();
            let entry = if file.is_dir() {
                Entry::Directory
            } else {
                let mut contents = Vec::new();
                file.read_to_end(&mut contents)
                    .map_err(|err| DownloadError::io("merge.read_entry", Some(node_id), err))?;
                Entry::File(contents)
            };
            if entries.insert(name.clone(), entry).is_some() {
                debug!(node_id = %node_id, entry = %name, "archive entry replaced by later node");
            }
        }
    }

    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = FileOptions::default();
    for (name, entry) in entries {
        match entry {
            Entry::Directory => writer
                .add_directory(name, options)
                .map_err(|err| DownloadError::archive("merge.add_directory", None, err))?,
            Entry::File(contents) => {
                writer
                    .start_file(name, options)
                    .map_err(|err| DownloadError::archive("merge.start_file", None, err))?;
                writer
                    .write_all(&contents)
                    .map_err(|err| DownloadError::io("merge.write_entry", None, err))?;
            }
        }
    }
    let merged = writer
        .finish()
        .map_err(|err| DownloadError::archive("merge.finish", None, err))?;
    Ok(merged.into_inner())
}
