//! Finding source images on the local filesystem.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// A source image found on disk.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct LocalSource {
    pub path: PathBuf,
    pub size: u64,
}

impl LocalSource {
    /// File name used for the job item.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

/// Walks files and directories for images with a supported extension.
pub struct SourceDiscovery {
    extensions: Vec<String>,
}

impl SourceDiscovery {
    pub fn new(supported_formats: &[String]) -> Self {
        Self {
            extensions: supported_formats
                .iter()
                .map(|f| f.trim_start_matches('.').to_lowercase())
                .collect(),
        }
    }

    /// Collect sources under every path, sorted and without duplicates.
    ///
    /// Files named directly are taken if their extension is supported.
    /// Directories are walked recursively, skipping hidden entries.
    pub fn discover(&self, paths: &[PathBuf]) -> Vec<LocalSource> {
        let mut found = BTreeSet::new();
        for path in paths {
            if path.is_file() {
                if let Some(source) = self.accept(path) {
                    found.insert(source);
                }
                continue;
            }
            let walker = WalkDir::new(path)
                .follow_links(true)
                .into_iter()
                .filter_entry(|e| e.depth() == 0 || !is_hidden(e.path()));
            for entry in walker.filter_map(|e| e.ok()) {
                if entry.file_type().is_file() {
                    if let Some(source) = self.accept(entry.path()) {
                        found.insert(source);
                    }
                }
            }
        }
        found.into_iter().collect()
    }

    fn accept(&self, path: &Path) -> Option<LocalSource> {
        if !self.is_supported(path) {
            return None;
        }
        let size = std::fs::metadata(path).ok()?.len();
        Some(LocalSource {
            path: path.to_path_buf(),
            size,
        })
    }

    fn is_supported(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| self.extensions.contains(&ext.to_lowercase()))
            .unwrap_or(false)
    }

    pub fn total_size(sources: &[LocalSource]) -> u64 {
        sources.iter().map(|s| s.size).sum()
    }
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProcessingConfig;

    fn discovery() -> SourceDiscovery {
        SourceDiscovery::new(&ProcessingConfig::default().supported_formats)
    }

    #[test]
    fn test_is_supported() {
        let d = discovery();
        assert!(d.is_supported(Path::new("a.JPG")));
        assert!(d.is_supported(Path::new("a.webp")));
        assert!(!d.is_supported(Path::new("a.txt")));
        assert!(!d.is_supported(Path::new("noext")));
    }

    #[test]
    fn test_walks_directories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("nested")).unwrap();
        std::fs::create_dir_all(dir.path().join(".cache")).unwrap();
        std::fs::write(dir.path().join("b.png"), b"12").unwrap();
        std::fs::write(dir.path().join("nested/a.jpg"), b"1").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"x").unwrap();
        std::fs::write(dir.path().join(".cache/c.png"), b"x").unwrap();

        let found = discovery().discover(&[dir.path().to_path_buf()]);
        let names: Vec<String> = found.iter().map(|s| s.file_name()).collect();
        assert_eq!(names, vec!["b.png", "a.jpg"]);
        assert_eq!(SourceDiscovery::total_size(&found), 3);
    }

    #[test]
    fn test_deduplicates_overlapping_paths() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.png");
        std::fs::write(&file, b"1").unwrap();

        let found = discovery().discover(&[dir.path().to_path_buf(), file]);
        assert_eq!(found.len(), 1);
    }
}
