use std::fmt;
use std::fs::{self, File};
use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};
use tempfile::Builder;

use crate::domain::Accession;
use crate::error::GeoflatError;

pub const ARCHIVE_FILE_NAME: &str = "NCBI_GEO_Dataset_TEMP.tar";
pub const EXTRACTED_MANIFEST_NAME: &str = "extracted_files.txt";
pub const ASSEMBLY_MANIFEST_NAME: &str = "assembly.json";
const LOCK_FILE_NAME: &str = ".geoflat.lock";

/// Which variant of a section table an output file holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    Full,
    Partial,
}

impl fmt::Display for TableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableKind::Full => write!(f, "FULL"),
            TableKind::Partial => write!(f, "PARTIAL"),
        }
    }
}

/// Fixed on-disk layout of one pipeline working root.
///
/// Every stage artifact lives at a deterministic path below `<root>/data`, which
/// is what makes completion checks a matter of looking at the filesystem.
#[derive(Debug, Clone)]
pub struct Layout {
    root: Utf8PathBuf,
}

impl Layout {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn base_dir(&self) -> Utf8PathBuf {
        self.root.join("data")
    }

    pub fn output_dir(&self) -> Utf8PathBuf {
        self.base_dir().join("output")
    }

    pub fn tsv_dir(&self) -> Utf8PathBuf {
        self.base_dir().join("tsv")
    }

    pub fn url_path(&self, accession: &Accession) -> Utf8PathBuf {
        self.output_dir()
            .join(format!("{}_download_url.txt", accession.as_str()))
    }

    pub fn archive_path(&self) -> Utf8PathBuf {
        self.output_dir().join(ARCHIVE_FILE_NAME)
    }

    pub fn extracted_manifest_path(&self) -> Utf8PathBuf {
        self.output_dir().join(EXTRACTED_MANIFEST_NAME)
    }

    pub fn assembly_manifest_path(&self) -> Utf8PathBuf {
        self.tsv_dir().join(ASSEMBLY_MANIFEST_NAME)
    }

    pub fn lock_path(&self) -> Utf8PathBuf {
        self.output_dir().join(LOCK_FILE_NAME)
    }

    pub fn tsv_path(&self, section: &str, kind: TableKind) -> Utf8PathBuf {
        self.tsv_dir().join(tsv_file_name(section, kind))
    }

    pub fn ensure_dirs(&self) -> Result<(), GeoflatError> {
        for dir in [self.base_dir(), self.output_dir(), self.tsv_dir()] {
            fs::create_dir_all(dir.as_std_path())
                .map_err(|err| GeoflatError::Filesystem(format!("create {dir}: {err}")))?;
        }
        Ok(())
    }

    /// True when the table directory holds at least one `.tsv` file.
    pub fn has_tsv_outputs(&self) -> bool {
        list_files_with_suffix(&self.tsv_dir(), ".tsv")
            .map(|files| !files.is_empty())
            .unwrap_or(false)
    }
}

/// `<Section>_<KIND>.tsv`, with spaces and path separators turned into `_` so
/// the file always lands directly in the table directory.
pub fn tsv_file_name(section: &str, kind: TableKind) -> String {
    format!("{section}_{kind}.tsv").replace([' ', '/', '\\'], "_")
}

/// Writes `content` next to `path` and renames it into place.
pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), GeoflatError> {
    write_atomic_with(path, |file| {
        file.write_all(content)
            .map_err(|err| GeoflatError::Filesystem(format!("write {path}: {err}")))?;
        Ok(content.len() as u64)
    })
    .map(|_| ())
}

/// Streams into a temporary sibling of `path`, then renames it into place.
///
/// The destination is either absent or complete; an interrupted writer only ever
/// leaves a `.part` temp file behind, which no stage enumerates.
pub fn write_atomic_with<F>(path: &Utf8Path, write: F) -> Result<u64, GeoflatError>
where
    F: FnOnce(&mut File) -> Result<u64, GeoflatError>,
{
    let parent = path
        .parent()
        .ok_or_else(|| GeoflatError::Filesystem(format!("invalid destination path {path}")))?;
    fs::create_dir_all(parent.as_std_path())
        .map_err(|err| GeoflatError::Filesystem(err.to_string()))?;
    let mut temp = Builder::new()
        .prefix(".geoflat-")
        .suffix(".part")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| GeoflatError::Filesystem(err.to_string()))?;
    let written = write(temp.as_file_mut())?;
    temp.as_file_mut()
        .sync_all()
        .map_err(|err| GeoflatError::Filesystem(err.to_string()))?;
    temp.persist(path.as_std_path())
        .map_err(|err| GeoflatError::Filesystem(format!("persist {path}: {err}")))?;
    Ok(written)
}

/// Regular files directly inside `dir` whose name ends with `suffix`, sorted by name.
pub fn list_files_with_suffix(
    dir: &Utf8Path,
    suffix: &str,
) -> Result<Vec<Utf8PathBuf>, GeoflatError> {
    if !dir.as_std_path().exists() {
        return Ok(Vec::new());
    }
    let entries = dir
        .read_dir_utf8()
        .map_err(|err| GeoflatError::Filesystem(format!("read {dir}: {err}")))?;
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| GeoflatError::Filesystem(err.to_string()))?;
        let is_file = entry
            .file_type()
            .map(|kind| kind.is_file())
            .unwrap_or(false);
        if is_file && entry.file_name().ends_with(suffix) {
            files.push(entry.path().to_path_buf());
        }
    }
    files.sort();
    Ok(files)
}
