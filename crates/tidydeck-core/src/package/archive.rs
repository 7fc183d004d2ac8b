use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};

use rusqlite::{Connection, OpenFlags};
use tempfile::TempDir;
use tracing::debug;
use zip::ZipArchive;

use crate::error::{Result, TidyDeckError};

/// Primary database entry name inside a package.
pub const DATABASE_ENTRY: &str = "collection.anki2";
/// Fallback database entry name written by newer exporters.
pub const DATABASE_ENTRY_FALLBACK: &str = "collection.anki21";
/// Entry holding the on-disk name → logical name JSON mapping.
pub const MEDIA_ENTRY: &str = "media";

/// Upper bound on buffer pre-sizing from a declared entry size.
const MAX_PREALLOC: u64 = 1 << 20;

/// An opened `.apkg` package.
///
/// The archive is extracted into a private temp directory that lives exactly as
/// long as this value; dropping it removes the directory on every exit path.
pub struct Package {
    source: PathBuf,
    workdir: TempDir,
    database: PathBuf,
    media_map: BTreeMap<String, String>,
    archive: ZipArchive<File>,
}

impl Package {
    pub fn open(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(TidyDeckError::NotFound(format!(
                "package file not found: {}",
                path.display()
            )));
        }

        let file = File::open(path)?;
        let mut archive = ZipArchive::new(file)
            .map_err(|e| TidyDeckError::Format(format!("{}: {e}", path.display())))?;

        let workdir = tempfile::Builder::new().prefix("tidydeck-read-").tempdir()?;
        archive.extract(workdir.path())?;

        let database = [DATABASE_ENTRY, DATABASE_ENTRY_FALLBACK]
            .iter()
            .map(|name| workdir.path().join(name))
            .find(|candidate| candidate.is_file())
            .ok_or_else(|| {
                TidyDeckError::Format(format!("no Anki database found in {}", path.display()))
            })?;

        let media_map = read_media_map(&workdir.path().join(MEDIA_ENTRY))?;
        debug!(
            "opened package {} ({} media entries)",
            path.display(),
            media_map.len()
        );

        Ok(Self {
            source: path.to_path_buf(),
            workdir,
            database,
            media_map,
            archive,
        })
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn workdir(&self) -> &Path {
        self.workdir.path()
    }

    /// Path of the extracted collection database.
    pub fn database_path(&self) -> &Path {
        &self.database
    }

    /// Read-only connection on the extracted database.
    pub fn open_database(&self) -> Result<Connection> {
        let conn = Connection::open_with_flags(
            &self.database,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Ok(conn)
    }

    /// On-disk name (`"0"`, `"1"`, ...) → logical name used in field markup.
    pub fn media_map(&self) -> &BTreeMap<String, String> {
        &self.media_map
    }

    /// Names of zip entries that hold media payloads.
    pub fn media_entries(&self) -> Vec<String> {
        self.archive
            .file_names()
            .filter(|name| !is_reserved_entry(name))
            .map(str::to_string)
            .collect()
    }

    /// Read a payload straight from the zip by its on-disk name.
    pub fn read_media(&mut self, disk_name: &str) -> Result<Vec<u8>> {
        let mut entry = self.archive.by_name(disk_name).map_err(|e| match e {
            zip::result::ZipError::FileNotFound => {
                TidyDeckError::NotFound(format!("media entry {disk_name}"))
            }
            other => TidyDeckError::Zip(other),
        })?;
        let mut data = Vec::with_capacity(entry.size().min(MAX_PREALLOC) as usize);
        entry.read_to_end(&mut data)?;
        Ok(data)
    }

    /// Copy every media payload into `dest_dir`, keeping on-disk names.
    pub fn extract_media(&mut self, dest_dir: &Path) -> Result<Vec<PathBuf>> {
        fs::create_dir_all(dest_dir)?;
        let mut extracted = Vec::new();
        for name in self.media_entries() {
            let data = self.read_media(&name)?;
            let target = dest_dir.join(&name);
            fs::write(&target, data)?;
            extracted.push(target);
        }
        Ok(extracted)
    }
}

fn is_reserved_entry(name: &str) -> bool {
    matches!(name, DATABASE_ENTRY | DATABASE_ENTRY_FALLBACK | MEDIA_ENTRY)
}

fn read_media_map(path: &Path) -> Result<BTreeMap<String, String>> {
    if !path.is_file() {
        return Ok(BTreeMap::new());
    }
    let contents = fs::read_to_string(path)?;
    if contents.trim().is_empty() {
        return Ok(BTreeMap::new());
    }
    serde_json::from_str(&contents)
        .map_err(|e| TidyDeckError::CorruptSchema(format!("media mapping: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;

    fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let file = File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        for (name, data) in entries {
            zip.start_file(*name, SimpleFileOptions::default()).unwrap();
            zip.write_all(data).unwrap();
        }
        zip.finish().unwrap();
    }

    #[test]
    fn test_open_missing_path_is_not_found() {
        let err = Package::open(Path::new("/tmp/nonexistent_tidydeck.apkg")).err().unwrap();
        assert!(matches!(err, TidyDeckError::NotFound(_)));
    }

    #[test]
    fn test_open_without_database_is_format_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.apkg");
        write_zip(&path, &[("media", b"{}")]);

        let err = Package::open(&path).err().unwrap();
        assert!(matches!(err, TidyDeckError::Format(_)));
    }

    #[test]
    fn test_open_accepts_fallback_name_and_reads_media() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("deck.apkg");
        write_zip(
            &path,
            &[
                ("collection.anki21", b"not really sqlite"),
                ("media", br#"{"0": "cat.jpg"}"#),
                ("0", b"JPEGDATA"),
            ],
        );

        let mut package = Package::open(&path).unwrap();
        assert!(package.database_path().ends_with("collection.anki21"));
        assert_eq!(package.media_map().get("0").map(String::as_str), Some("cat.jpg"));
        assert_eq!(package.media_entries(), vec!["0".to_string()]);
        assert_eq!(package.read_media("0").unwrap(), b"JPEGDATA");
        assert!(matches!(
            package.read_media("9"),
            Err(TidyDeckError::NotFound(_))
        ));
    }

    #[test]
    fn test_read_media_larger_than_prealloc_bound() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("big.apkg");
        let payload = vec![7u8; MAX_PREALLOC as usize + 17];
        write_zip(
            &path,
            &[
                ("collection.anki2", b"db"),
                ("media", br#"{"0": "big.bin"}"#),
                ("0", payload.as_slice()),
            ],
        );

        let mut package = Package::open(&path).unwrap();
        assert_eq!(package.read_media("0").unwrap(), payload);
    }

    #[test]
    fn test_workdir_removed_on_drop() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("deck.apkg");
        write_zip(&path, &[("collection.anki2", b"db")]);

        let package = Package::open(&path).unwrap();
        let workdir = package.workdir().to_path_buf();
        assert!(workdir.exists());
        assert!(package.media_map().is_empty());
        drop(package);
        assert!(!workdir.exists());
    }

    #[test]
    fn test_extract_media_copies_payloads() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("deck.apkg");
        write_zip(
            &path,
            &[
                ("collection.anki2", b"db"),
                ("media", br#"{"0": "a.mp3", "1": "b.png"}"#),
                ("0", b"mp3"),
                ("1", b"png"),
            ],
        );

        let mut package = Package::open(&path).unwrap();
        let out = dir.path().join("media_out");
        let files = package.extract_media(&out).unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(fs::read(out.join("1")).unwrap(), b"png");
    }
}
