//! Files in scope for a loop, honoring per-target ignore files.
//!
//! Directory entries are keyed `<dir name>/<relative path>`, single files by
//! their file name.

use std::fs;
use std::path::Path;

use glob::Pattern;
use log::{debug, warn};
use walkdir::WalkDir;

use crate::domain::loop_record::TargetSet;

/// Directories never listed
const SKIP_DIRS: &[&str] = &[".git", ".turnloop"];

/// Patterns read from an ignore file
#[derive(Debug, Clone, Default)]
pub struct IgnoreRules {
    patterns: Vec<Pattern>,
}

impl IgnoreRules {
    /// Parse gitignore-style lines; blank lines and `#` comments are skipped
    pub fn parse(content: &str) -> Self {
        let mut patterns = Vec::new();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let cleaned = line.trim_start_matches('/').trim_end_matches('/');
            match Pattern::new(cleaned) {
                Ok(pattern) => patterns.push(pattern),
                Err(e) => warn!("Skipping invalid ignore pattern '{}': {}", line, e),
            }
        }
        Self { patterns }
    }

    /// Rules from `<dir>/<ignore_file>`, empty if the file is absent
    pub fn load(dir: &Path, ignore_file: &str) -> Self {
        match fs::read_to_string(dir.join(ignore_file)) {
            Ok(content) => Self::parse(&content),
            Err(_) => Self::default(),
        }
    }

    /// True if the relative path or any of its components match
    pub fn is_ignored(&self, rel: &Path) -> bool {
        if self.patterns.is_empty() {
            return false;
        }
        let full = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        self.patterns.iter().any(|pattern| {
            pattern.matches(&full)
                || rel
                    .components()
                    .any(|c| pattern.matches(&c.as_os_str().to_string_lossy()))
        })
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

/// Sorted source keys for a target set
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceListing {
    pub keys: Vec<String>,
}

impl SourceListing {
    pub fn total(&self) -> usize {
        self.keys.len()
    }

    /// First `max` keys
    pub fn preview(&self, max: usize) -> &[String] {
        &self.keys[..self.keys.len().min(max)]
    }
}

/// List files under every target, honoring each directory's ignore file
pub fn list_sources(targets: &TargetSet, ignore_file: &str) -> SourceListing {
    let mut keys = Vec::new();

    for dir in &targets.dirs {
        let rules = IgnoreRules::load(dir, ignore_file);
        let prefix = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .filter(|n| !n.is_empty() && n != ".");

        let root = dir.clone();
        let walker = WalkDir::new(dir)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(move |e| {
                if e.path() == root {
                    return true;
                }
                if e.file_type().is_dir() && e.file_name().to_str().is_some_and(|n| SKIP_DIRS.contains(&n)) {
                    return false;
                }
                match e.path().strip_prefix(&root) {
                    Ok(rel) => !rules.is_ignored(rel),
                    Err(_) => true,
                }
            });

        for entry in walker.filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(rel) = entry.path().strip_prefix(dir) else {
                continue;
            };
            let rel = rel.to_string_lossy();
            let key = match &prefix {
                Some(prefix) => format!("{}/{}", prefix, rel),
                None => rel.into_owned(),
            };
            keys.push(key);
        }
    }

    for file in &targets.files {
        if let Some(name) = file.file_name() {
            keys.push(name.to_string_lossy().into_owned());
        }
    }

    keys.sort();
    keys.dedup();
    debug!("Listed {} source files", keys.len());
    SourceListing { keys }
}
