//! Durable JSON state files.
//!
//! Writes go to a sibling temporary file that is synced and then renamed over
//! the target, so a concurrent reader sees either the old or the new contents.
//! Reads never fail: a missing, unreadable or malformed file yields the type's
//! default value.
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Errors from writing a state file.
#[derive(Debug)]
pub enum StoreError {
    Serialize {
        source: serde_json::Error,
    },
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    Sync {
        path: PathBuf,
        source: std::io::Error,
    },
    Rename {
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Serialize { source } => write!(f, "failed to serialize state: {source}"),
            StoreError::Write { path, source } => {
                write!(
                    f,
                    "failed to write temp state file {}: {source}",
                    path.display()
                )
            }
            StoreError::Sync { path, source } => {
                write!(f, "failed to sync {}: {source}", path.display())
            }
            StoreError::Rename { from, to, source } => {
                write!(
                    f,
                    "failed to rename {} -> {}: {source}",
                    from.display(),
                    to.display()
                )
            }
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Serialize { source } => Some(source),
            StoreError::Write { source, .. } => Some(source),
            StoreError::Sync { source, .. } => Some(source),
            StoreError::Rename { source, .. } => Some(source),
        }
    }
}

/// Render `data` as indented JSON with sorted object keys.
///
/// Going through `serde_json::Value` sorts keys, since its map type is ordered.
pub fn to_sorted_json<T: Serialize>(data: &T) -> Result<String, StoreError> {
    let value = serde_json::to_value(data).map_err(|e| StoreError::Serialize { source: e })?;
    let mut json =
        serde_json::to_string_pretty(&value).map_err(|e| StoreError::Serialize { source: e })?;
    json.push('\n');
    Ok(json)
}

/// Atomically replace `path` with the JSON rendering of `data`.
pub fn write_atomic<T: Serialize>(path: &Path, data: &T) -> Result<(), StoreError> {
    let json = to_sorted_json(data)?;
    let staged = stage(path, json.as_bytes())?;
    commit(staged, path)
}

/// Write `bytes` to a synced temporary file next to `path`.
///
/// Nothing is visible at `path` until [`commit`] runs. Dropping the returned
/// file without committing removes it and leaves `path` untouched.
fn stage(path: &Path, bytes: &[u8]) -> Result<NamedTempFile, StoreError> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "state".to_string());

    let mut tmp = tempfile::Builder::new()
        .prefix(&format!(".{file_name}.tmp."))
        .tempfile_in(dir)
        .map_err(|e| StoreError::Write {
            path: dir.join(format!(".{file_name}.tmp")),
            source: e,
        })?;

    tmp.write_all(bytes).map_err(|e| StoreError::Write {
        path: tmp.path().to_path_buf(),
        source: e,
    })?;
    tmp.as_file().sync_all().map_err(|e| StoreError::Sync {
        path: tmp.path().to_path_buf(),
        source: e,
    })?;

    Ok(tmp)
}

/// Rename a staged file over `path`.
fn commit(staged: NamedTempFile, path: &Path) -> Result<(), StoreError> {
    let from = staged.path().to_path_buf();
    staged.persist(path).map_err(|e| StoreError::Rename {
        from,
        to: path.to_path_buf(),
        source: e.error,
    })?;
    Ok(())
}

/// Read and parse `path`, falling back to `T::default()` on any failure.
pub fn read_or_default<T: DeserializeOwned + Default>(path: &Path) -> T {
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(error = %e, path = %path.display(), "failed to read state file");
            }
            return T::default();
        }
    };

    match serde_json::from_str(&contents) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(
                error = %e,
                path = %path.display(),
                "malformed state file, treating as empty"
            );
            T::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::tempdir;

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    #[serde(default)]
    struct Sample {
        zeta: u32,
        alpha: String,
    }

    fn sample(zeta: u32) -> Sample {
        Sample {
            zeta,
            alpha: "a".to_string(),
        }
    }

    #[test]
    fn write_then_read() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");

        write_atomic(&path, &sample(7)).unwrap();

        let back: Sample = read_or_default(&path);
        assert_eq!(back, sample(7));
    }

    #[test]
    fn keys_are_sorted_and_indented() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");

        write_atomic(&path, &sample(1)).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let alpha = contents.find("\"alpha\"").unwrap();
        let zeta = contents.find("\"zeta\"").unwrap();
        assert!(alpha < zeta, "keys should be sorted: {contents}");
        assert!(contents.contains("\n  \"alpha\""));
        assert!(contents.ends_with('\n'));
    }

    #[test]
    fn no_temp_file_left_behind() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");

        write_atomic(&path, &sample(1)).unwrap();
        write_atomic(&path, &sample(2)).unwrap();

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .flatten()
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["state.json".to_string()]);
    }

    #[test]
    fn crash_before_rename_keeps_old_contents() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        write_atomic(&path, &sample(1)).unwrap();
        let before = std::fs::read_to_string(&path).unwrap();

        // Stage new contents but never commit them.
        let new_json = to_sorted_json(&sample(2)).unwrap();
        let staged = stage(&path, new_json.as_bytes()).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), before);
        drop(staged);

        assert_eq!(std::fs::read_to_string(&path).unwrap(), before);
        let back: Sample = read_or_default(&path);
        assert_eq!(back, sample(1));
    }

    #[test]
    fn staged_file_is_complete_before_commit() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        write_atomic(&path, &sample(1)).unwrap();

        let new_json = to_sorted_json(&sample(2)).unwrap();
        let staged = stage(&path, new_json.as_bytes()).unwrap();
        assert_eq!(std::fs::read_to_string(staged.path()).unwrap(), new_json);

        commit(staged, &path).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), new_json);
    }

    #[test]
    fn missing_file_reads_as_default() {
        let dir = tempdir().unwrap();
        let back: Sample = read_or_default(&dir.path().join("absent.json"));
        assert_eq!(back, Sample::default());
    }

    #[test]
    fn malformed_file_reads_as_default() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{ not json").unwrap();

        let back: Sample = read_or_default(&path);
        assert_eq!(back, Sample::default());
    }

    #[test]
    fn truncated_file_reads_as_default() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{\"zeta\": 4, \"alp").unwrap();

        let back: Sample = read_or_default(&path);
        assert_eq!(back, Sample::default());
    }

    #[test]
    fn write_to_nonexistent_dir_fails() {
        let path = PathBuf::from("/nonexistent/dir/state.json");
        let err = write_atomic(&path, &sample(1)).unwrap_err();
        assert!(matches!(err, StoreError::Write { .. }));
        assert!(err.to_string().contains("failed to write temp state file"));
    }
}
