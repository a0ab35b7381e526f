//! Directory listing collaborator

use std::path::Path;
use std::process::Command;
use tracing::{debug, warn};

use crate::error::{DistortError, Result};
use crate::protocol::WorkerClass;

/// Lists the files of a directory that a job may be submitted for
pub trait DirectoryLister: Send + Sync {
    /// Names (not paths) of regular files in `dir` whose extension is in
    /// `extensions`, sorted
    fn list(&self, dir: &Path, extensions: &[&str]) -> Result<Vec<String>>;
}

/// Lists through `find <dir> -maxdepth 1 -type f`
#[derive(Debug, Clone, Default)]
pub struct FindLister;

impl DirectoryLister for FindLister {
    fn list(&self, dir: &Path, extensions: &[&str]) -> Result<Vec<String>> {
        let output = Command::new("find")
            .arg(dir)
            .args(["-maxdepth", "1", "-type", "f"])
            .output()?;

        if !output.status.success() {
            warn!(
                "find {:?} exited with {}: {}",
                dir,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
            return Err(DistortError::Config {
                reason: format!("cannot list directory {:?}", dir),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut names: Vec<String> = stdout
            .lines()
            .filter_map(|line| Path::new(line).file_name()?.to_str().map(str::to_string))
            .filter(|name| has_extension(name, extensions))
            .collect();
        names.sort();

        debug!("Listed {} matching file(s) in {:?}", names.len(), dir);
        Ok(names)
    }
}

/// Every extension any worker class accepts
pub fn all_extensions() -> Vec<&'static str> {
    WorkerClass::ALL
        .iter()
        .flat_map(|class| class.extensions().iter().copied())
        .collect()
}

fn has_extension(name: &str, extensions: &[&str]) -> bool {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => {
            extensions.iter().any(|e| e.eq_ignore_ascii_case(ext))
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_lister_filters_extensions() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.txt", "a.png", "skip.mkv", "noext"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        std::fs::create_dir(dir.path().join("sub.txt")).unwrap();

        let names = FindLister.list(dir.path(), &all_extensions()).unwrap();
        assert_eq!(names, ["a.png", "b.txt"]);
    }

    #[test]
    fn test_has_extension() {
        assert!(has_extension("notes.TXT", &["txt"]));
        assert!(!has_extension(".txt", &["txt"]));
        assert!(!has_extension("txt", &["txt"]));
    }
}
