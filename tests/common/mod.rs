#![allow(dead_code)]

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use bzip2::{Compression as BzLevel, write::BzEncoder};
use flate2::{Compression as GzLevel, write::GzEncoder};
use tempfile::{TempDir, tempdir};

/// Scratch directory helper that cleans up files automatically on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    /// Creates a fresh scratch directory for the current test case.
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    /// Returns the root path for all files owned by this workspace.
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn join(&self, name: &str) -> PathBuf {
        self.temp_dir.path().join(name)
    }

    /// Writes `contents` into a file under the workspace and returns the path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        self.write_bytes(name, contents.as_bytes())
    }

    pub fn write_bytes(&self, name: &str, contents: &[u8]) -> PathBuf {
        let path = self.join(name);
        let mut file = File::create(&path).expect("create temp file");
        file.write_all(contents).expect("write temp file contents");
        path
    }

    /// Writes `contents` gzip-compressed.
    pub fn write_gz(&self, name: &str, contents: &[u8]) -> PathBuf {
        let mut encoder = GzEncoder::new(Vec::new(), GzLevel::default());
        encoder.write_all(contents).expect("gzip contents");
        let bytes = encoder.finish().expect("finish gzip");
        self.write_bytes(name, &bytes)
    }

    /// Writes `contents` bzip2-compressed.
    pub fn write_bz2(&self, name: &str, contents: &[u8]) -> PathBuf {
        let mut encoder = BzEncoder::new(Vec::new(), BzLevel::default());
        encoder.write_all(contents).expect("bzip2 contents");
        let bytes = encoder.finish().expect("finish bzip2");
        self.write_bytes(name, &bytes)
    }

    pub fn read(&self, path: &Path) -> Vec<u8> {
        fs::read(path).expect("read workspace file")
    }

    /// File names in the workspace root, sorted.
    pub fn entries(&self) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(self.path())
            .expect("list workspace")
            .map(|entry| {
                entry
                    .expect("dir entry")
                    .file_name()
                    .to_string_lossy()
                    .into_owned()
            })
            .collect();
        names.sort();
        names
    }
}

/// Tab-separated lines joined with `\n`, with a trailing newline.
pub fn tsv(lines: &[&str]) -> String {
    let mut text = lines.join("\n");
    text.push('\n');
    text
}
