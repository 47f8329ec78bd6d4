//! A small atomic JSON store: write-temp-then-rename with `fsync` before the
//! rename, so a crash mid-write never leaves a half-written file in place of
//! a valid one.
//!
//! Every on-disk mutation in this crate — transcript records, job status,
//! stage outputs, the dedup index — goes through [`write_atomic`] rather than
//! opening the target path directly. Centralising it here, instead of
//! repeating the temp-file dance at each call site, is the generalisation of
//! the teacher's inline `convert_to_file` write and of
//! `write_json_atomic`/`_write_json_atomic` from the system this was
//! distilled from.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io;
use std::path::Path;
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Serialize `value` and write it to `path` atomically.
///
/// The write lands in `<path>.tmp` first, is flushed and `fsync`'d, then
/// renamed onto `path`. Renames are atomic on the same filesystem, so readers
/// never observe a partially written file.
pub async fn write_atomic<T: Serialize + Sync>(path: &Path, value: &T) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let tmp_path = tmp_path_for(path);
    let bytes = serde_json::to_vec(value)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

    let result = async {
        let mut file = fs::File::create(&tmp_path).await?;
        file.write_all(&bytes).await?;
        file.sync_all().await?;
        fs::rename(&tmp_path, path).await?;
        Ok(())
    }
    .await;

    if result.is_err() {
        let _ = fs::remove_file(&tmp_path).await;
    }
    result
}

/// Read and parse `path`, returning `None` if it does not exist, is
/// unreadable, or fails to parse as JSON. Callers that need to distinguish
/// "missing" from "corrupt" should call [`read_json`] directly.
pub async fn read_or_default<T: DeserializeOwned>(path: &Path) -> Option<T> {
    read_json(path).await.ok().flatten()
}

/// Read and parse `path`.
///
/// - `Ok(Some(value))` — parsed successfully.
/// - `Ok(None)` — the file does not exist.
/// - `Err(_)` — the file exists but could not be read or parsed.
pub async fn read_json<T: DeserializeOwned>(path: &Path) -> io::Result<Option<T>> {
    match fs::read(path).await {
        Ok(bytes) => {
            let value = serde_json::from_slice(&bytes)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            Ok(Some(value))
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

fn tmp_path_for(path: &Path) -> std::path::PathBuf {
    let mut s = path.as_os_str().to_os_string();
    s.push(".tmp");
    std::path::PathBuf::from(s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Sample {
        a: u32,
        b: String,
    }

    #[tokio::test]
    async fn round_trips_through_atomic_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("thing.json");
        let value = Sample {
            a: 7,
            b: "hello".into(),
        };
        write_atomic(&path, &value).await.unwrap();
        let read: Sample = read_json(&path).await.unwrap().unwrap();
        assert_eq!(read, value);
        assert!(!dir.path().join("thing.json.tmp").exists());
    }

    #[tokio::test]
    async fn missing_file_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.json");
        let read: Option<Sample> = read_or_default(&path).await;
        assert!(read.is_none());
    }

    #[tokio::test]
    async fn malformed_file_is_an_error_not_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, b"not json").await.unwrap();
        let result: io::Result<Option<Sample>> = read_json(&path).await;
        assert!(result.is_err());
        assert!(read_or_default::<Sample>(&path).await.is_none());
    }

    #[tokio::test]
    async fn overwrite_replaces_previous_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("thing.json");
        write_atomic(&path, &Sample { a: 1, b: "x".into() })
            .await
            .unwrap();
        write_atomic(&path, &Sample { a: 2, b: "y".into() })
            .await
            .unwrap();
        let read: Sample = read_json(&path).await.unwrap().unwrap();
        assert_eq!(read, Sample { a: 2, b: "y".into() });
    }
}
