//! Reading chart archives
//!
//! Charts are distributed as `.tgz` archives with a single top-level
//! directory named after the chart.

use flate2::read::GzDecoder;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Component, Path};
use tar::Archive;

use crate::error::{CoreError, Result};

/// Whether a path names a chart archive
pub fn is_archive(path: &Path) -> bool {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    name.ends_with(".tgz") || name.ends_with(".tar.gz")
}

/// Read all files from an archive on disk
///
/// Returns paths relative to the chart's top-level directory.
pub fn read_archive(archive_path: &Path) -> Result<BTreeMap<String, Vec<u8>>> {
    let file = File::open(archive_path)?;
    read_entries(GzDecoder::new(BufReader::new(file)))
}

/// Read all files from an in-memory archive
pub fn read_archive_bytes(data: &[u8]) -> Result<BTreeMap<String, Vec<u8>>> {
    read_entries(GzDecoder::new(data))
}

fn read_entries<R: Read>(reader: R) -> Result<BTreeMap<String, Vec<u8>>> {
    let mut archive = Archive::new(reader);
    let mut contents = BTreeMap::new();

    for entry in archive.entries()? {
        let mut entry = entry?;
        if entry.header().entry_type().is_dir() {
            continue;
        }

        let path = entry.path()?.into_owned();
        if path
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)))
        {
            return Err(CoreError::Archive {
                message: format!("illegal path in archive: {}", path.display()),
            });
        }

        // Drop the chart's top-level directory
        let relative: Vec<String> = path
            .components()
            .filter(|c| matches!(c, Component::Normal(_)))
            .skip(1)
            .map(|c| c.as_os_str().to_string_lossy().to_string())
            .collect();
        if relative.is_empty() {
            continue;
        }

        let mut data = Vec::new();
        entry.read_to_end(&mut data)?;
        contents.insert(relative.join("/"), data);
    }

    if contents.is_empty() {
        return Err(CoreError::Archive {
            message: "archive contains no chart files".to_string(),
        });
    }

    Ok(contents)
}

/// SHA256 digest of a file, hex encoded
pub fn file_digest(path: &Path) -> Result<String> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];

    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hex::encode(hasher.finalize()))
}
