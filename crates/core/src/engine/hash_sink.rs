//! Per-job hash manifest sink.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;

/// Line-oriented sink for `identifier|file|md5` records.
///
/// Opened once per job and closed exactly once whichever way the job
/// exits. `append` may be called concurrently from the engine's download
/// workers.
#[derive(Debug)]
pub struct HashSink {
    writer: Mutex<BufWriter<File>>,
}

impl HashSink {
    /// Create (truncate) the manifest file, creating parent folders as
    /// needed.
    pub fn create(path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = File::create(path)?;
        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    /// Append one record.
    pub fn append(&self, identifier: &str, file: &str, md5: &str) -> std::io::Result<()> {
        let mut writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        writeln!(writer, "{}|{}|{}", identifier, file, md5)
    }

    /// Flush and close.
    ///
    /// Dropping the sink also flushes, but going through `finish` surfaces
    /// the error instead of discarding it.
    pub fn finish(self) -> std::io::Result<()> {
        let mut writer = self
            .writer
            .into_inner()
            .unwrap_or_else(|e| e.into_inner());
        writer.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_append_and_finish() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hashes.txt");

        let sink = HashSink::create(&path).unwrap();
        sink.append("itemA", "disc1/track01.flac", "0cc175b9c0f1b6a831c399e269772661")
            .unwrap();
        sink.append("itemA", "itemA_meta.xml", "92eb5ffee6ae2fec3ad71c777531578f")
            .unwrap();
        sink.finish().unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(
            lines[0],
            "itemA|disc1/track01.flac|0cc175b9c0f1b6a831c399e269772661"
        );
    }

    #[test]
    fn test_create_makes_parent_folders() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/deep/hashes.txt");

        let sink = HashSink::create(&path).unwrap();
        sink.finish().unwrap();
        assert!(path.is_file());
    }

    #[test]
    fn test_drop_flushes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hashes.txt");

        {
            let sink = HashSink::create(&path).unwrap();
            sink.append("itemA", "file.txt", "abc").unwrap();
            // Dropped without finish; BufWriter flushes on drop.
        }

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "itemA|file.txt|abc\n");
    }
}
