//! Numbered file series.
//!
//! Cameras split long recordings into chunks that share a name and differ
//! only in the last two characters: `M1234.MLV`, `M1234.M00`, `M1234.M01`.
//! The file the user opens comes first, the continuation chunks follow in
//! name order.

use mlraw_core::{RawError, Result};
use std::path::{Path, PathBuf};

/// Find the file series `path` belongs to, `path` first.
pub fn file_series(path: &Path) -> Result<Vec<PathBuf>> {
    if !path.is_file() {
        return Err(RawError::NotFound(format!(
            "File not found: {}",
            path.display()
        )));
    }
    let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
        return Ok(vec![path.to_path_buf()]);
    };
    let Some(base) = chunk_base(&name) else {
        return Ok(vec![path.to_path_buf()]);
    };

    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };

    let mut continuation: Vec<PathBuf> = std::fs::read_dir(&dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|p| p.is_file())
        .filter(|p| {
            p.file_name()
                .map(|n| n.to_string_lossy())
                .is_some_and(|n| n != name && chunk_base(&n) == Some(base))
        })
        .collect();
    continuation.sort();

    let mut series = Vec::with_capacity(continuation.len() + 1);
    series.push(path.to_path_buf());
    series.extend(continuation);
    Ok(series)
}

/// Name without its last two characters, if it has a 3+ character extension.
fn chunk_base(name: &str) -> Option<&str> {
    let (_, ext) = name.rsplit_once('.')?;
    if ext.len() < 3 || !name.is_char_boundary(name.len() - 2) {
        return None;
    }
    Some(&name[..name.len() - 2])
}

/// Files in `dir` whose extension matches one of `extensions`
/// (case-insensitive), sorted by name.
pub fn directory_frames(dir: &Path, extensions: &[&str]) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(RawError::NotFound(format!(
            "Directory not found: {}",
            dir.display()
        )));
    }
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|p| p.is_file() && has_extension(p, extensions))
        .collect();
    files.sort();
    Ok(files)
}

/// Case-insensitive extension check.
pub fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| extensions.iter().any(|x| x.eq_ignore_ascii_case(e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(dir: &Path, name: &str) -> PathBuf {
        let p = dir.join(name);
        std::fs::write(&p, b"x").unwrap();
        p
    }

    #[test]
    fn test_series_order() {
        let tmp = tempfile::tempdir().unwrap();
        let main = touch(tmp.path(), "M01-1234.MLV");
        touch(tmp.path(), "M01-1234.M01");
        touch(tmp.path(), "M01-1234.M00");
        touch(tmp.path(), "M01-9999.M00");
        touch(tmp.path(), "M01-1234.MLV.mrx");

        let series = file_series(&main).unwrap();
        let names: Vec<_> = series
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["M01-1234.MLV", "M01-1234.M00", "M01-1234.M01"]);
    }

    #[test]
    fn test_series_missing_file() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(matches!(
            file_series(&tmp.path().join("nope.RAW")),
            Err(RawError::NotFound(_))
        ));
    }

    #[test]
    fn test_directory_frames_filters_and_sorts() {
        let tmp = tempfile::tempdir().unwrap();
        touch(tmp.path(), "frame_0002.dng");
        touch(tmp.path(), "frame_0001.DNG");
        touch(tmp.path(), "notes.txt");
        let files = directory_frames(tmp.path(), &["dng"]).unwrap();
        assert_eq!(files.len(), 2);
        assert!(files[0].ends_with("frame_0001.DNG"));
    }

    #[test]
    fn test_chunk_base() {
        assert_eq!(chunk_base("A.RAW"), Some("A.R"));
        assert_eq!(chunk_base("A.R"), None);
        assert_eq!(chunk_base("noext"), None);
    }
}
