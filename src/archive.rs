use std::fs::{self, File};
use std::io::{self, BufReader};

use camino::{Utf8Path, Utf8PathBuf};
use flate2::read::GzDecoder;
use rayon::ThreadPool;
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
use tar::Archive;

use crate::error::GeoflatError;
use crate::layout::{list_files_with_suffix, write_atomic_with, write_bytes_atomic};

/// Members with this suffix are the compressed flat files we care about.
pub const COMPRESSED_MEMBER_SUFFIX: &str = ".txt.gz";
const GZIP_SUFFIX: &str = ".gz";

/// Extracts every member of the tar archive into `destination`.
///
/// Member paths that would land outside `destination` are refused by the tar
/// reader and surface as an archive error.
pub fn extract_tar(archive_path: &Utf8Path, destination: &Utf8Path) -> Result<(), GeoflatError> {
    let file = File::open(archive_path.as_std_path())
        .map_err(|err| GeoflatError::Archive(format!("open {archive_path}: {err}")))?;
    fs::create_dir_all(destination.as_std_path())
        .map_err(|err| GeoflatError::Filesystem(err.to_string()))?;
    let mut archive = Archive::new(BufReader::new(file));
    archive
        .unpack(destination.as_std_path())
        .map_err(|err| GeoflatError::Archive(format!("extract {archive_path}: {err}")))
}

/// Decompresses one `.gz` member into `target_dir`, dropping the `.gz` suffix.
pub fn decompress_member(
    member: &Utf8Path,
    target_dir: &Utf8Path,
) -> Result<Utf8PathBuf, GeoflatError> {
    let file_name = member
        .file_name()
        .and_then(|name| name.strip_suffix(GZIP_SUFFIX))
        .ok_or_else(|| GeoflatError::Archive(format!("not a gzip member: {member}")))?;
    let destination = target_dir.join(file_name);
    let source = File::open(member.as_std_path())
        .map_err(|err| GeoflatError::Filesystem(format!("open {member}: {err}")))?;
    let mut decoder = GzDecoder::new(BufReader::new(source));
    let written = write_atomic_with(&destination, |file| {
        io::copy(&mut decoder, file)
            .map_err(|err| GeoflatError::Archive(format!("decompress {member}: {err}")))
    })?;
    tracing::debug!(member = %member, destination = %destination, bytes = written, "decompressed");
    Ok(destination)
}

/// Extracts `archive_path` into `output_dir`, then decompresses every
/// `.txt.gz` member into `base_dir`.
///
/// Compressed members are removed only after the whole batch decompressed, so a
/// failure leaves them in place for the next attempt. Returns the decompressed
/// paths in member-name order.
pub fn unpack_archive(
    archive_path: &Utf8Path,
    output_dir: &Utf8Path,
    base_dir: &Utf8Path,
    pool: &ThreadPool,
) -> Result<Vec<Utf8PathBuf>, GeoflatError> {
    extract_tar(archive_path, output_dir)?;
    tracing::info!(archive = %archive_path, destination = %output_dir, "archive extracted");

    let members = list_files_with_suffix(output_dir, COMPRESSED_MEMBER_SUFFIX)?;
    if members.is_empty() {
        tracing::warn!(archive = %archive_path, "archive holds no {COMPRESSED_MEMBER_SUFFIX} members");
    }

    let decompressed = pool.install(|| {
        members
            .par_iter()
            .map(|member| decompress_member(member, base_dir))
            .collect::<Result<Vec<_>, _>>()
    })?;

    for member in &members {
        fs::remove_file(member.as_std_path())
            .map_err(|err| GeoflatError::Filesystem(format!("remove {member}: {err}")))?;
    }
    tracing::info!(count = decompressed.len(), "decompressed flat files");
    Ok(decompressed)
}

pub fn write_manifest(path: &Utf8Path, files: &[Utf8PathBuf]) -> Result<(), GeoflatError> {
    let content = files
        .iter()
        .map(|file| file.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    write_bytes_atomic(path, content.as_bytes())
}

pub fn read_manifest(path: &Utf8Path) -> Result<Vec<Utf8PathBuf>, GeoflatError> {
    let content = fs::read_to_string(path.as_std_path())
        .map_err(|err| GeoflatError::Filesystem(format!("read {path}: {err}")))?;
    Ok(content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(Utf8PathBuf::from)
        .collect())
}
