//! Filesystem helpers shared by the index, the cache and the engines

use crate::convert::language_for_extension;
use docsync_types::{Error, Result};
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use std::time::UNIX_EPOCH;
use tokio::fs;

/// Write `data` to `path` through a temp file in the same directory and a rename
pub async fn write_atomic(path: &Path, data: Vec<u8>) -> Result<()> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || write_atomic_blocking(&path, &data))
        .await
        .map_err(|e| Error::local_io("", format!("Task join error: {}", e)))?
}

fn write_atomic_blocking(path: &Path, data: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir).map_err(|e| Error::local_io(dir, e.to_string()))?;

    let mut temp =
        tempfile::NamedTempFile::new_in(dir).map_err(|e| Error::local_io(dir, e.to_string()))?;
    temp.write_all(data)
        .and_then(|()| temp.as_file().sync_all())
        .map_err(|e| Error::local_io(path, e.to_string()))?;
    temp.persist(path)
        .map_err(|e| Error::local_io(path, e.error.to_string()))?;
    Ok(())
}

/// Modification time in nanoseconds since the epoch
pub fn modified_nanos(metadata: &std::fs::Metadata) -> Option<i64> {
    let modified = metadata.modified().ok()?;
    let nanos = modified.duration_since(UNIX_EPOCH).ok()?.as_nanos();
    i64::try_from(nanos).ok()
}

/// Modification time of `path`, `None` when it does not exist
pub async fn path_modified_nanos(path: &Path) -> Option<i64> {
    let metadata = fs::metadata(path).await.ok()?;
    modified_nanos(&metadata)
}

/// Hex blake3 digest of `data`
pub fn content_hash(data: &[u8]) -> String {
    blake3::hash(data).to_hex().to_string()
}

/// Read and hash a file
pub async fn hash_file(path: &Path) -> Result<String> {
    let data = fs::read(path)
        .await
        .map_err(|e| Error::local_io(path, e.to_string()))?;
    Ok(content_hash(&data))
}

/// Index key of a relative path: components joined with `/`
pub fn rel_key(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Relative path of an index key
pub fn key_path(key: &str) -> PathBuf {
    key.split('/').filter(|p| !p.is_empty()).collect()
}

/// File name usable on every platform for a remote title
pub fn safe_file_name(title: &str) -> String {
    let cleaned: String = title
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim().trim_start_matches('.').trim();

    if cleaned.is_empty() {
        "untitled".to_string()
    } else {
        cleaned.to_string()
    }
}

/// Remote title of a working-tree file: the file name for source files, the stem otherwise
pub fn node_title(path: &Path) -> String {
    let is_source = path
        .extension()
        .and_then(|e| e.to_str())
        .and_then(language_for_extension)
        .is_some();
    let part = if is_source {
        path.file_name()
    } else {
        path.file_stem()
    };
    part.map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Working-tree file name for a pulled node titled `title`
pub fn file_name_for_title(title: &str) -> String {
    let name = safe_file_name(title);
    let is_source = Path::new(&name)
        .extension()
        .and_then(|e| e.to_str())
        .and_then(language_for_extension)
        .is_some();
    if is_source {
        name
    } else {
        format!("{}.md", name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_write_atomic_replaces_content() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("file.yaml");

        write_atomic(&path, b"one".to_vec()).await.unwrap();
        write_atomic(&path, b"two".to_vec()).await.unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "two");
        let leftovers = std::fs::read_dir(path.parent().unwrap()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[tokio::test]
    async fn test_hash_file_matches_content_hash() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("a.md");
        std::fs::write(&path, "hello").unwrap();

        assert_eq!(hash_file(&path).await.unwrap(), content_hash(b"hello"));
        assert_eq!(content_hash(b"hello").len(), 64);
        assert!(hash_file(&temp_dir.path().join("missing")).await.is_err());
    }

    #[test]
    fn test_rel_key_round_trip() {
        let key = rel_key(Path::new("docs/guide/intro.md"));
        assert_eq!(key, "docs/guide/intro.md");
        assert_eq!(key_path(&key), PathBuf::from("docs").join("guide").join("intro.md"));
        assert_eq!(rel_key(Path::new("./a/b")), "a/b");
    }

    #[test]
    fn test_titles_and_file_names() {
        assert_eq!(node_title(Path::new("docs/notes.md")), "notes");
        assert_eq!(node_title(Path::new("src/main.py")), "main.py");
        assert_eq!(node_title(Path::new("README")), "README");
        assert_eq!(file_name_for_title("notes"), "notes.md");
        assert_eq!(file_name_for_title("main.py"), "main.py");
        assert_eq!(file_name_for_title("v1.2 plan"), "v1.2 plan.md");
        assert_eq!(file_name_for_title("a/b"), "a_b.md");
    }

    #[test]
    fn test_safe_file_name() {
        assert_eq!(safe_file_name("a/b: c?"), "a_b_ c_");
        assert_eq!(safe_file_name("  "), "untitled");
        assert_eq!(safe_file_name(".hidden"), "hidden");
    }
}
