//! Offline verification of previously-downloaded items against a hash
//! manifest.
//!
//! A manifest is the line-oriented `identifier|file|md5` stream written by
//! the engine during a task (see `engine::HashSink`).

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Errors that can occur during verification.
#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("hash manifest not found: {0}")]
    ManifestNotFound(String),

    #[error("malformed manifest line {line}: {content}")]
    MalformedLine { line: usize, content: String },

    #[error("data folder not found: {0}")]
    FolderNotFound(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// One `identifier|file|md5` record from a manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub identifier: String,
    pub file: String,
    pub md5: String,
}

/// Options restricting or relaxing a verification run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VerifyOptions {
    /// Compare by hash value only, ignoring where files live. Useful when
    /// files were moved after download; a hash stored in several places
    /// is only checked for once.
    #[serde(default)]
    pub no_paths: bool,
    /// Restrict the check to these identifiers.
    #[serde(default)]
    pub identifiers: Option<Vec<String>>,
    /// Case-insensitive substring filters on file names; empty checks all.
    #[serde(default)]
    pub file_filters: Vec<String>,
    /// Keep files matching no filter instead of files matching one.
    #[serde(default)]
    pub invert_file_filtering: bool,
}

/// Outcome of one verification run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VerifyReport {
    pub files_checked: usize,
    pub verified: usize,
    /// Entries with no corresponding local file (or hash, with no_paths).
    pub missing: Vec<String>,
    /// Entries whose local content does not match the manifest.
    pub mismatched: Vec<String>,
}

impl VerifyReport {
    pub fn is_clean(&self) -> bool {
        self.missing.is_empty() && self.mismatched.is_empty()
    }
}

/// Parse a hash manifest.
pub fn load_manifest(path: &Path) -> Result<Vec<ManifestEntry>, VerifyError> {
    if !path.is_file() {
        return Err(VerifyError::ManifestNotFound(path.display().to_string()));
    }
    let reader = BufReader::new(File::open(path)?);
    let mut entries = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let mut parts = line.splitn(3, '|');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(identifier), Some(file), Some(md5)) if !md5.trim().is_empty() => {
                entries.push(ManifestEntry {
                    identifier: identifier.to_string(),
                    file: file.to_string(),
                    md5: md5.trim().to_lowercase(),
                });
            }
            _ => {
                return Err(VerifyError::MalformedLine {
                    line: index + 1,
                    content: line,
                });
            }
        }
    }
    Ok(entries)
}

/// Check a data folder against manifest entries.
///
/// Entries are expected at `{data_folder}/{identifier}/{file}` unless
/// `no_paths` is set, in which case only the set of hash values found
/// anywhere under the folder is consulted.
pub fn verify_folder(
    manifest: &[ManifestEntry],
    data_folder: &Path,
    options: &VerifyOptions,
) -> Result<VerifyReport, VerifyError> {
    if !data_folder.is_dir() {
        return Err(VerifyError::FolderNotFound(
            data_folder.display().to_string(),
        ));
    }

    let selected: Vec<&ManifestEntry> = manifest
        .iter()
        .filter(|entry| {
            options
                .identifiers
                .as_ref()
                .map(|ids| ids.iter().any(|id| *id == entry.identifier))
                .unwrap_or(true)
        })
        .filter(|entry| {
            matches_filters(
                &entry.file,
                &options.file_filters,
                options.invert_file_filtering,
            )
        })
        .collect();

    let mut report = VerifyReport {
        files_checked: selected.len(),
        ..Default::default()
    };

    if options.no_paths {
        let mut local_hashes = HashSet::new();
        for path in walk_files(data_folder)? {
            local_hashes.insert(md5_file(&path)?);
        }
        let mut seen = HashSet::new();
        for entry in selected {
            // A hash stored under several names is only checked once.
            if !seen.insert(entry.md5.clone()) {
                continue;
            }
            if local_hashes.contains(&entry.md5) {
                report.verified += 1;
            } else {
                report
                    .missing
                    .push(format!("{}/{}", entry.identifier, entry.file));
            }
        }
    } else {
        for entry in selected {
            let name = format!("{}/{}", entry.identifier, entry.file);
            let path = data_folder.join(&entry.identifier).join(&entry.file);
            if !path.is_file() {
                report.missing.push(name);
                continue;
            }
            let actual = md5_file(&path)?;
            if actual == entry.md5 {
                debug!(file = %name, "hash verified");
                report.verified += 1;
            } else {
                report.mismatched.push(name);
            }
        }
    }

    Ok(report)
}

/// Lowercase MD5 of a file, read in 64 KiB blocks.
pub fn md5_file(path: &Path) -> std::io::Result<String> {
    let file = File::open(path)?;
    let mut reader = BufReader::with_capacity(64 * 1024, file);
    let mut context = md5::Context::new();
    let mut buffer = [0u8; 64 * 1024];
    loop {
        let read = reader.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        context.consume(&buffer[..read]);
    }
    Ok(format!("{:x}", context.compute()))
}

fn matches_filters(name: &str, filters: &[String], invert: bool) -> bool {
    if filters.is_empty() {
        return true;
    }
    let name = name.to_lowercase();
    let hit = filters
        .iter()
        .any(|filter| name.contains(&filter.to_lowercase()));
    hit != invert
}

/// Sorted list of every file under a folder, recursively.
fn walk_files(folder: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![folder.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.is_dir() {
                pending.push(path);
            } else {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_file(root: &Path, relative: &str, content: &str) -> PathBuf {
        let path = root.join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, content).unwrap();
        path
    }

    fn manifest_for(root: &Path, entries: &[(&str, &str, &str)]) -> PathBuf {
        let path = root.join("hashes.txt");
        let content: String = entries
            .iter()
            .map(|(id, file, md5)| format!("{}|{}|{}\n", id, file, md5))
            .collect();
        std::fs::write(&path, content).unwrap();
        path
    }

    // md5("hello") = 5d41402abc4b2a76b9719d911017c592
    const HELLO_MD5: &str = "5d41402abc4b2a76b9719d911017c592";

    #[test]
    fn test_md5_file() {
        let dir = TempDir::new().unwrap();
        let path = write_file(dir.path(), "hello.txt", "hello");
        assert_eq!(md5_file(&path).unwrap(), HELLO_MD5);
    }

    #[test]
    fn test_load_manifest() {
        let dir = TempDir::new().unwrap();
        let path = manifest_for(
            dir.path(),
            &[("itemA", "disc1/file.txt", "AA"), ("itemB", "b.txt", "bb")],
        );

        let entries = load_manifest(&path).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].identifier, "itemA");
        assert_eq!(entries[0].file, "disc1/file.txt");
        assert_eq!(entries[0].md5, "aa"); // lowercased

        assert!(matches!(
            load_manifest(&dir.path().join("absent.txt")),
            Err(VerifyError::ManifestNotFound(_))
        ));
    }

    #[test]
    fn test_load_manifest_rejects_malformed_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.txt");
        std::fs::write(&path, "itemA|only-two-fields\n").unwrap();

        let err = load_manifest(&path).unwrap_err();
        assert!(matches!(err, VerifyError::MalformedLine { line: 1, .. }));
    }

    #[test]
    fn test_verify_clean_folder() {
        let dir = TempDir::new().unwrap();
        let data = dir.path().join("data");
        write_file(&data, "itemA/hello.txt", "hello");

        let manifest = vec![ManifestEntry {
            identifier: "itemA".to_string(),
            file: "hello.txt".to_string(),
            md5: HELLO_MD5.to_string(),
        }];

        let report = verify_folder(&manifest, &data, &VerifyOptions::default()).unwrap();
        assert!(report.is_clean());
        assert_eq!(report.files_checked, 1);
        assert_eq!(report.verified, 1);
    }

    #[test]
    fn test_verify_detects_missing_and_mismatched() {
        let dir = TempDir::new().unwrap();
        let data = dir.path().join("data");
        write_file(&data, "itemA/changed.txt", "not hello");

        let manifest = vec![
            ManifestEntry {
                identifier: "itemA".to_string(),
                file: "changed.txt".to_string(),
                md5: HELLO_MD5.to_string(),
            },
            ManifestEntry {
                identifier: "itemA".to_string(),
                file: "gone.txt".to_string(),
                md5: HELLO_MD5.to_string(),
            },
        ];

        let report = verify_folder(&manifest, &data, &VerifyOptions::default()).unwrap();
        assert!(!report.is_clean());
        assert_eq!(report.mismatched, vec!["itemA/changed.txt".to_string()]);
        assert_eq!(report.missing, vec!["itemA/gone.txt".to_string()]);
    }

    #[test]
    fn test_verify_no_paths_accepts_relocated_files() {
        let dir = TempDir::new().unwrap();
        let data = dir.path().join("data");
        // Stored somewhere entirely different from the manifest path.
        write_file(&data, "elsewhere/renamed.bin", "hello");

        let manifest = vec![ManifestEntry {
            identifier: "itemA".to_string(),
            file: "hello.txt".to_string(),
            md5: HELLO_MD5.to_string(),
        }];

        let strict = verify_folder(&manifest, &data, &VerifyOptions::default()).unwrap();
        assert_eq!(strict.missing.len(), 1);

        let relaxed = verify_folder(
            &manifest,
            &data,
            &VerifyOptions {
                no_paths: true,
                ..Default::default()
            },
        )
        .unwrap();
        assert!(relaxed.is_clean());
        assert_eq!(relaxed.verified, 1);
    }

    #[test]
    fn test_verify_identifier_restriction() {
        let dir = TempDir::new().unwrap();
        let data = dir.path().join("data");
        write_file(&data, "itemA/hello.txt", "hello");

        let manifest = vec![
            ManifestEntry {
                identifier: "itemA".to_string(),
                file: "hello.txt".to_string(),
                md5: HELLO_MD5.to_string(),
            },
            ManifestEntry {
                identifier: "itemB".to_string(),
                file: "absent.txt".to_string(),
                md5: HELLO_MD5.to_string(),
            },
        ];

        let options = VerifyOptions {
            identifiers: Some(vec!["itemA".to_string()]),
            ..Default::default()
        };
        let report = verify_folder(&manifest, &data, &options).unwrap();
        assert!(report.is_clean());
        assert_eq!(report.files_checked, 1);
    }

    #[test]
    fn test_verify_file_filters() {
        let dir = TempDir::new().unwrap();
        let data = dir.path().join("data");
        write_file(&data, "itemA/hello.txt", "hello");

        let manifest = vec![
            ManifestEntry {
                identifier: "itemA".to_string(),
                file: "hello.txt".to_string(),
                md5: HELLO_MD5.to_string(),
            },
            ManifestEntry {
                identifier: "itemA".to_string(),
                file: "skipped.flac".to_string(),
                md5: HELLO_MD5.to_string(),
            },
        ];

        let options = VerifyOptions {
            file_filters: vec![".txt".to_string()],
            ..Default::default()
        };
        let report = verify_folder(&manifest, &data, &options).unwrap();
        assert_eq!(report.files_checked, 1);
        assert!(report.is_clean());
    }

    #[test]
    fn test_verify_missing_folder() {
        let dir = TempDir::new().unwrap();
        let result = verify_folder(&[], &dir.path().join("absent"), &VerifyOptions::default());
        assert!(matches!(result, Err(VerifyError::FolderNotFound(_))));
    }
}
