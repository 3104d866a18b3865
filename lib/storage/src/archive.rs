// Backup archive for exported documents
use anyhow::{anyhow, bail, Result};
use atomicwrites::{AtomicFile, OverwriteBehavior};
use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const ARCHIVE_EXTENSION: &str = ".xml.gz";
const CHECKSUM_EXTENSION: &str = ".sha256";

/// Archive description for listings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveEntry {
    pub name: String,
    pub creation_time: Option<String>,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

/// Directory of gzip-compressed backup documents with SHA-256 sidecars.
pub struct BackupArchive {
    dir: PathBuf,
}

impl BackupArchive {
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Generate archive filename with timestamp
    fn generate_name(name: &str) -> String {
        let now: DateTime<Utc> = Utc::now();
        format!("{}-{}{}", name, now.format("%Y-%m-%d-%H-%M-%S"), ARCHIVE_EXTENSION)
    }

    fn checksum_path(path: &Path) -> PathBuf {
        let mut raw = path.as_os_str().to_owned();
        raw.push(CHECKSUM_EXTENSION);
        PathBuf::from(raw)
    }

    /// Resolve an archive file name inside the directory, refusing anything
    /// that would escape it.
    fn entry_path(&self, file: &str) -> Result<PathBuf> {
        if file.is_empty() || file.contains('/') || file.contains('\\') || file.contains("..") {
            bail!("Invalid archive name '{}'", file);
        }
        Ok(self.dir.join(file))
    }

    fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
        AtomicFile::new(path, OverwriteBehavior::AllowOverwrite)
            .write(|f| f.write_all(bytes))
            .map_err(|e| anyhow!("Failed to write {}: {}", path.display(), e))
    }

    fn describe(path: &Path, checksum: Option<String>) -> Result<ArchiveEntry> {
        let metadata = fs::metadata(path)?;
        let creation_time = metadata
            .created()
            .or_else(|_| metadata.modified())
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .and_then(|d| DateTime::from_timestamp(d.as_secs() as i64, 0))
            .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string());
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();

        Ok(ArchiveEntry {
            name,
            creation_time,
            size: metadata.len(),
            checksum,
        })
    }

    /// Compress and store `document` under a timestamped name
    pub fn create(&self, name: &str, document: &[u8]) -> Result<ArchiveEntry> {
        let file = Self::generate_name(name);
        let path = self.entry_path(&file)?;

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(document)?;
        let compressed = encoder.finish()?;

        let checksum = format!("{:x}", Sha256::digest(&compressed));
        Self::write_atomic(&path, &compressed)?;
        Self::write_atomic(&Self::checksum_path(&path), checksum.as_bytes())?;

        info!(archive = %file, bytes = compressed.len(), "created backup archive");
        Self::describe(&path, Some(checksum))
    }

    /// List all archives, newest first
    pub fn list(&self) -> Result<Vec<ArchiveEntry>> {
        let mut entries = Vec::new();
        if !self.dir.exists() {
            return Ok(entries);
        }

        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let is_archive = path
                .file_name()
                .and_then(|n| n.to_str())
                .map_or(false, |n| n.ends_with(ARCHIVE_EXTENSION));
            if !is_archive {
                continue;
            }
            let checksum = fs::read_to_string(Self::checksum_path(&path))
                .ok()
                .map(|s| s.trim().to_string());
            entries.push(Self::describe(&path, checksum)?);
        }

        // Sort by name (which includes timestamp)
        entries.sort_by(|a, b| b.name.cmp(&a.name));
        Ok(entries)
    }

    /// Load and decompress an archive, verifying its checksum when present
    pub fn load(&self, file: &str) -> Result<Vec<u8>> {
        let path = self.entry_path(file)?;
        if !path.exists() {
            return Err(anyhow!("Archive '{}' not found", file));
        }

        let compressed = fs::read(&path)?;
        if let Ok(expected) = fs::read_to_string(Self::checksum_path(&path)) {
            let expected = expected.trim();
            let actual = format!("{:x}", Sha256::digest(&compressed));
            if actual != expected {
                bail!("Checksum mismatch for '{}': expected {}, got {}", file, expected, actual);
            }
        }

        let mut decoder = GzDecoder::new(&compressed[..]);
        let mut document = Vec::new();
        decoder.read_to_end(&mut document)?;
        debug!(archive = %file, bytes = document.len(), "loaded backup archive");
        Ok(document)
    }

    /// Load an archive from an arbitrary path (no checksum sidecar required)
    pub fn load_from_path(path: &Path) -> Result<Vec<u8>> {
        let file = File::open(path)?;
        let mut decoder = GzDecoder::new(BufReader::new(file));
        let mut document = Vec::new();
        decoder.read_to_end(&mut document)?;
        Ok(document)
    }

    /// Delete an archive and its checksum
    pub fn delete(&self, file: &str) -> Result<bool> {
        let path = self.entry_path(file)?;
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(&path)?;
        let checksum = Self::checksum_path(&path);
        if checksum.exists() {
            fs::remove_file(checksum)?;
        }
        Ok(true)
    }

    /// Get archive file path
    pub fn path_of(&self, file: &str) -> Option<PathBuf> {
        self.entry_path(file).ok().filter(|p| p.exists())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const DOCUMENT: &[u8] = br#"<?xml version="1.0" encoding="UTF-8"?><Company type="object" class="app.Company"/>"#;

    #[test]
    fn test_create_list_load() {
        let dir = TempDir::new().unwrap();
        let archive = BackupArchive::new(dir.path()).unwrap();

        let entry = archive.create("company", DOCUMENT).unwrap();
        assert!(entry.name.starts_with("company-"));
        assert!(entry.name.ends_with(".xml.gz"));
        assert_eq!(entry.checksum.as_ref().map(String::len), Some(64));

        let listed = archive.list().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, entry.name);
        assert_eq!(listed[0].checksum, entry.checksum);

        assert_eq!(archive.load(&entry.name).unwrap(), DOCUMENT);
        assert_eq!(
            BackupArchive::load_from_path(&dir.path().join(&entry.name)).unwrap(),
            DOCUMENT
        );
    }

    #[test]
    fn test_checksum_mismatch() {
        let dir = TempDir::new().unwrap();
        let archive = BackupArchive::new(dir.path()).unwrap();
        let entry = archive.create("company", DOCUMENT).unwrap();

        let sidecar = BackupArchive::checksum_path(&dir.path().join(&entry.name));
        fs::write(sidecar, "0".repeat(64)).unwrap();
        let err = archive.load(&entry.name).unwrap_err();
        assert!(err.to_string().contains("Checksum mismatch"));
    }

    #[test]
    fn test_delete() {
        let dir = TempDir::new().unwrap();
        let archive = BackupArchive::new(dir.path()).unwrap();
        let entry = archive.create("company", DOCUMENT).unwrap();

        assert!(archive.delete(&entry.name).unwrap());
        assert!(!archive.delete(&entry.name).unwrap());
        assert!(archive.list().unwrap().is_empty());
        assert!(archive.load(&entry.name).is_err());
    }

    #[test]
    fn test_rejects_escaping_names() {
        let dir = TempDir::new().unwrap();
        let archive = BackupArchive::new(dir.path()).unwrap();
        assert!(archive.load("../secret.xml.gz").is_err());
        assert!(archive.path_of("nested/a.xml.gz").is_none());
    }
}
