//! Annotation files
//!
//! Two line-oriented formats are used:
//!
//! - label files: `<key> <label>` per line (`noisy_label_kv.txt`)
//! - key lists: one `<key>` per line (`clean_test_key_list.txt`)
//!
//! Blank lines are ignored. Anything else that does not parse is an error
//! naming the file and line.

use super::DataError;
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Leading directory stripped from annotation keys
const IMAGE_DIR_PREFIX: &str = "images/";

/// Read a `<key> <label>` file, preserving line order
pub fn read_label_file(path: impl AsRef<Path>) -> Result<Vec<(String, usize)>, DataError> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).map_err(|e| DataError::io(path, e))?;

    let mut entries = Vec::new();
    for (line_no, line) in content.lines().enumerate() {
        let mut fields = line.split_whitespace();
        let Some(key) = fields.next() else {
            continue;
        };

        let malformed = |reason: String| DataError::MalformedAnnotation {
            path: path.to_path_buf(),
            line: line_no + 1,
            reason,
        };

        let label = fields
            .next()
            .ok_or_else(|| malformed(format!("missing label after '{}'", key)))?;
        let label = label
            .parse::<usize>()
            .map_err(|e| malformed(format!("invalid label '{}': {}", label, e)))?;
        if let Some(extra) = fields.next() {
            return Err(malformed(format!("unexpected field '{}'", extra)));
        }

        entries.push((key.to_string(), label));
    }

    Ok(entries)
}

/// Read a label file into a key → label map
pub fn read_label_map(path: impl AsRef<Path>) -> Result<HashMap<String, usize>, DataError> {
    Ok(read_label_file(path)?.into_iter().collect())
}

/// Read a one-key-per-line list
pub fn read_key_list(path: impl AsRef<Path>) -> Result<Vec<String>, DataError> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).map_err(|e| DataError::io(path, e))?;

    let mut keys = Vec::new();
    for (line_no, line) in content.lines().enumerate() {
        let mut fields = line.split_whitespace();
        let Some(key) = fields.next() else {
            continue;
        };
        if fields.next().is_some() {
            return Err(DataError::MalformedAnnotation {
                path: path.to_path_buf(),
                line: line_no + 1,
                reason: "expected a single key".to_string(),
            });
        }
        keys.push(key.to_string());
    }

    Ok(keys)
}

/// Write a `<key> <label>` file
pub fn write_label_file(path: impl AsRef<Path>, entries: &[(String, usize)]) -> Result<(), DataError> {
    let path = path.as_ref();
    let mut file = fs::File::create(path).map_err(|e| DataError::io(path, e))?;
    for (key, label) in entries {
        writeln!(file, "{} {}", key, label).map_err(|e| DataError::io(path, e))?;
    }
    Ok(())
}

/// Write a one-key-per-line list
pub fn write_key_list(path: impl AsRef<Path>, keys: &[String]) -> Result<(), DataError> {
    let path = path.as_ref();
    let mut file = fs::File::create(path).map_err(|e| DataError::io(path, e))?;
    for key in keys {
        writeln!(file, "{}", key).map_err(|e| DataError::io(path, e))?;
    }
    Ok(())
}

/// Image path of an annotation key under the dataset root
pub fn resolve_key(root: &Path, key: &str) -> PathBuf {
    root.join(key.strip_prefix(IMAGE_DIR_PREFIX).unwrap_or(key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_label_file_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("noisy_label_kv.txt");
        let entries = vec![
            ("images/0/00/1.jpg".to_string(), 3),
            ("images/0/00/2.jpg".to_string(), 13),
            ("images/9/99/3.jpg".to_string(), 0),
        ];

        write_label_file(&path, &entries).unwrap();
        assert_eq!(read_label_file(&path).unwrap(), entries);
    }

    #[test]
    fn test_key_list_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("clean_test_key_list.txt");
        let keys = vec!["images/a.jpg".to_string(), "images/b.jpg".to_string()];

        write_key_list(&path, &keys).unwrap();
        assert_eq!(read_key_list(&path).unwrap(), keys);
    }

    #[test]
    fn test_malformed_line_reports_location() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("labels.txt");
        fs::write(&path, "a.jpg 1\n\nb.jpg seven\n").unwrap();

        match read_label_file(&path) {
            Err(DataError::MalformedAnnotation { line, .. }) => assert_eq!(line, 3),
            other => panic!("expected malformed annotation, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let dir = TempDir::new().unwrap();
        let result = read_key_list(dir.path().join("absent.txt"));
        assert!(matches!(result, Err(DataError::DatasetNotFound { .. })));
    }

    #[test]
    fn test_resolve_key_strips_image_dir() {
        let root = Path::new("/data/clothing1m");
        assert_eq!(
            resolve_key(root, "images/0/12/34.jpg"),
            PathBuf::from("/data/clothing1m/0/12/34.jpg")
        );
        assert_eq!(resolve_key(root, "0/1.png"), PathBuf::from("/data/clothing1m/0/1.png"));
    }
}
