use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDateTime};
use thiserror::Error;
use tracing::{debug, warn};

const ARCHIVE_TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M%S";

#[derive(Debug, Error)]
pub enum LayoutFileError {
    #[error("failed to inspect layout file {path}: {source}")]
    Inspect {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to archive layout file {path} to {archive}: {source}")]
    Archive {
        path: PathBuf,
        archive: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write layout file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayoutPreparation {
    Missing,
    WithinLimit { bytes: u64 },
    Archived { archive: PathBuf, bytes: u64 },
}

/// Keeps the layout file under `max_bytes`. An oversized file is copied next
/// to itself with a timestamped name and truncated. A missing file is normal.
pub fn prepare_layout_file(
    path: &Path,
    max_bytes: u64,
) -> Result<LayoutPreparation, LayoutFileError> {
    prepare_layout_file_at(path, max_bytes, Local::now().naive_local())
}

pub fn prepare_layout_file_at(
    path: &Path,
    max_bytes: u64,
    now: NaiveDateTime,
) -> Result<LayoutPreparation, LayoutFileError> {
    let bytes = match fs::metadata(path) {
        Ok(metadata) => metadata.len(),
        Err(error) if error.kind() == io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "layout_file_missing");
            return Ok(LayoutPreparation::Missing);
        }
        Err(source) => {
            return Err(LayoutFileError::Inspect {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    if bytes <= max_bytes {
        return Ok(LayoutPreparation::WithinLimit { bytes });
    }

    let archive = unused_archive_path(path, now);
    fs::copy(path, &archive).map_err(|source| LayoutFileError::Archive {
        path: path.to_path_buf(),
        archive: archive.clone(),
        source,
    })?;
    write_bytes_atomic(path, &[]).map_err(|source| LayoutFileError::Write {
        path: path.to_path_buf(),
        source,
    })?;

    warn!(
        path = %path.display(),
        archive = %archive.display(),
        bytes,
        max_bytes,
        "layout_file_archived"
    );
    Ok(LayoutPreparation::Archived { archive, bytes })
}

/// `<stem>.<YYYYMMDD-HHMMSS>.<ext>` next to `path`.
pub fn archive_path_for(path: &Path, now: NaiveDateTime) -> PathBuf {
    archive_path_with_suffix(path, now, None)
}

fn archive_path_with_suffix(path: &Path, now: NaiveDateTime, suffix: Option<u32>) -> PathBuf {
    let stem = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("layout");
    let mut stamp = now.format(ARCHIVE_TIMESTAMP_FORMAT).to_string();
    if let Some(suffix) = suffix {
        stamp.push_str(&format!("-{suffix}"));
    }
    let name = match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) => format!("{stem}.{stamp}.{ext}"),
        None => format!("{stem}.{stamp}"),
    };
    path.with_file_name(name)
}

fn unused_archive_path(path: &Path, now: NaiveDateTime) -> PathBuf {
    let mut candidate = archive_path_for(path, now);
    let mut suffix = 1;
    while candidate.exists() {
        candidate = archive_path_with_suffix(path, now, Some(suffix));
        suffix += 1;
    }
    candidate
}

/// Replaces the layout file's contents without leaving a partial file.
pub fn save_layout(path: &Path, contents: &str) -> Result<(), LayoutFileError> {
    write_bytes_atomic(path, contents.as_bytes()).map_err(|source| LayoutFileError::Write {
        path: path.to_path_buf(),
        source,
    })
}

fn write_bytes_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let tmp_path = temp_path_for(path);
    fs::write(&tmp_path, bytes)?;
    replace_file(&tmp_path, path)
}

fn replace_file(tmp_path: &Path, final_path: &Path) -> io::Result<()> {
    match fs::remove_file(final_path) {
        Ok(_) => {}
        Err(error) if error.kind() == io::ErrorKind::NotFound => {}
        Err(error) => {
            let _ = fs::remove_file(tmp_path);
            return Err(error);
        }
    }

    if let Err(error) = fs::rename(tmp_path, final_path) {
        let _ = fs::remove_file(tmp_path);
        return Err(error);
    }
    Ok(())
}

fn temp_path_for(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("layout");
    path.with_file_name(format!("{file_name}.tmp"))
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use tempfile::TempDir;

    use super::*;

    fn stamp() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 9)
            .and_then(|date| date.and_hms_opt(7, 5, 2))
            .expect("valid timestamp")
    }

    #[test]
    fn archive_name_inserts_timestamp_before_extension() {
        assert_eq!(
            archive_path_for(Path::new("/cfg/overlay_layout.ini"), stamp()),
            PathBuf::from("/cfg/overlay_layout.20240309-070502.ini")
        );
        assert_eq!(
            archive_path_for(Path::new("/cfg/layout"), stamp()),
            PathBuf::from("/cfg/layout.20240309-070502")
        );
    }

    #[test]
    fn missing_file_is_not_an_error() {
        let dir = TempDir::new().expect("temp dir");

        let result = prepare_layout_file_at(&dir.path().join("layout.ini"), 16, stamp());

        assert_eq!(result.expect("prepare"), LayoutPreparation::Missing);
    }

    #[test]
    fn file_at_the_cap_is_left_alone() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("layout.ini");
        fs::write(&path, [b'x'; 16]).expect("write");

        let result = prepare_layout_file_at(&path, 16, stamp()).expect("prepare");

        assert_eq!(result, LayoutPreparation::WithinLimit { bytes: 16 });
        assert_eq!(fs::read(&path).expect("read").len(), 16);
    }

    #[test]
    fn oversized_file_is_archived_and_truncated() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("layout.ini");
        fs::write(&path, "[Window][Debug]\nPos=60,60\n").expect("write");

        let result = prepare_layout_file_at(&path, 8, stamp()).expect("prepare");

        let archive = dir.path().join("layout.20240309-070502.ini");
        assert_eq!(
            result,
            LayoutPreparation::Archived {
                archive: archive.clone(),
                bytes: 26,
            }
        );
        assert_eq!(
            fs::read_to_string(&archive).expect("archive"),
            "[Window][Debug]\nPos=60,60\n"
        );
        assert_eq!(fs::read(&path).expect("truncated").len(), 0);
        assert!(!dir.path().join("layout.ini.tmp").exists());
    }

    #[test]
    fn existing_archive_is_not_overwritten() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("layout.ini");
        let first_archive = dir.path().join("layout.20240309-070502.ini");
        fs::write(&first_archive, "older").expect("write archive");
        fs::write(&path, "0123456789").expect("write");

        let result = prepare_layout_file_at(&path, 4, stamp()).expect("prepare");

        let second_archive = dir.path().join("layout.20240309-070502-1.ini");
        assert_eq!(
            result,
            LayoutPreparation::Archived {
                archive: second_archive.clone(),
                bytes: 10,
            }
        );
        assert_eq!(fs::read_to_string(first_archive).expect("first"), "older");
        assert_eq!(
            fs::read_to_string(second_archive).expect("second"),
            "0123456789"
        );
    }

    #[test]
    fn save_layout_creates_parent_directories() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("nested").join("layout.ini");

        save_layout(&path, "[Window]\n").expect("save");

        assert_eq!(fs::read_to_string(&path).expect("read"), "[Window]\n");
    }
}
