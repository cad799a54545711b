//! Small file-system helpers shared by the durable-state writers.
//!
//! External observers poll the session directory, so every write here goes
//! through a temp file followed by a rename. A reader at any instant sees
//! either the previous complete contents or the new complete contents.

use std::path::Path;

use serde::Serialize;

/// Atomically replace `path` with `bytes`.
///
/// The parent directory is created when missing (observers are free to delete
/// the whole session directory between writes).
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    // Append rather than replace the extension: `agent-1.session` and
    // `agent-1.signal` must not share a temp name.
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);

    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await
}

/// Serialize `value` as pretty JSON and write it atomically.
pub async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> std::io::Result<()> {
    let bytes = serde_json::to_vec_pretty(value)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    write_atomic(path, &bytes).await
}
