//! Output file storage
//!
//! Command outputs requested via `outputFile` land in the operator-supplied
//! output directory. Filenames are reduced to a safe character set before
//! touching the filesystem; everything else about the path is owned by this
//! module so the engine never builds paths itself.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

/// Writes command outputs under a fixed directory.
#[derive(Debug, Clone)]
pub struct OutputStore {
    directory: PathBuf,
}

impl OutputStore {
    pub fn new(directory: PathBuf) -> Self {
        Self { directory }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Save `data` under `filename` inside the output directory.
    ///
    /// Empty data is silently dropped. The filename is sanitized first; a
    /// name that sanitizes to nothing is an error.
    pub fn save(&self, data: &str, filename: &str) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }

        let safe_name = sanitize_filename(filename);
        if safe_name.is_empty() {
            bail!("output filename is unacceptable: '{filename}'");
        }

        fs::create_dir_all(&self.directory).with_context(|| {
            format!("cannot create output directory '{}'", self.directory.display())
        })?;

        let path = self.directory.join(&safe_name);
        fs::write(&path, data)
            .with_context(|| format!("cannot write output file '{}'", path.display()))
    }
}

/// Strip every character outside `[a-zA-Z0-9._-]`.
fn sanitize_filename(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn writes_into_directory() {
        let dir = TempDir::new().unwrap();
        let store = OutputStore::new(dir.path().to_path_buf());
        store.save("interface up\n", "show-int.txt").unwrap();
        let content = fs::read_to_string(dir.path().join("show-int.txt")).unwrap();
        assert_eq!(content, "interface up\n");
    }

    #[test]
    fn sanitizes_hostile_names() {
        let dir = TempDir::new().unwrap();
        let store = OutputStore::new(dir.path().to_path_buf());
        store.save("x", "../../etc/passwd").unwrap();
        assert!(dir.path().join("....etcpasswd").exists());
    }

    #[test]
    fn rejects_names_with_no_safe_characters() {
        let dir = TempDir::new().unwrap();
        let store = OutputStore::new(dir.path().to_path_buf());
        assert!(store.save("x", "///").is_err());
    }

    #[test]
    fn skips_empty_payloads() {
        let dir = TempDir::new().unwrap();
        let store = OutputStore::new(dir.path().to_path_buf());
        store.save("", "empty.txt").unwrap();
        assert!(!dir.path().join("empty.txt").exists());
    }

    #[test]
    fn creates_directory_on_demand() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("outputs");
        let store = OutputStore::new(nested.clone());
        store.save("data", "file.log").unwrap();
        assert!(nested.join("file.log").exists());
    }
}
