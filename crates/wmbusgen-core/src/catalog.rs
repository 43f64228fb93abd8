//! Driver catalog and component resources
//!
//! The catalog is the set of optional driver sources shipped with the
//! component (`driver_<name>.cc`). It is scanned once at startup; the
//! [`ComponentManifest`] later lists every source file of the component,
//! leaving out the drivers the build does not need.

use globset::{Glob, GlobMatcher, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Failed to read catalog directory {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid file pattern {pattern}: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: globset::Error,
    },
}

fn compile_glob(pattern: String) -> Result<Glob, CatalogError> {
    Glob::new(&pattern).map_err(|source| CatalogError::Pattern { pattern, source })
}

/// File naming rule for catalog entries: `<prefix><name>.<extension>`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamePattern {
    pub prefix: String,
    pub extension: String,
}

impl Default for NamePattern {
    fn default() -> Self {
        Self {
            prefix: "driver_".to_string(),
            extension: "cc".to_string(),
        }
    }
}

impl NamePattern {
    /// Glob matching every file of the pattern, e.g. `driver_*.cc`
    pub fn glob(&self) -> String {
        format!(
            "{}*.{}",
            globset::escape(&self.prefix),
            globset::escape(&self.extension)
        )
    }

    pub fn matcher(&self) -> Result<NameMatcher, CatalogError> {
        Ok(NameMatcher {
            pattern: self.clone(),
            glob: compile_glob(self.glob())?.compile_matcher(),
        })
    }

    /// File name of the entry called `name`
    pub fn file_name(&self, name: &str) -> String {
        format!("{}{}.{}", self.prefix, name, self.extension)
    }
}

/// A compiled [`NamePattern`]
#[derive(Debug, Clone)]
pub struct NameMatcher {
    pattern: NamePattern,
    glob: GlobMatcher,
}

impl NameMatcher {
    /// Logical name of a file matching the pattern
    pub fn logical_name<'f>(&self, file_name: &'f str) -> Option<&'f str> {
        if !self.glob.is_match(file_name) {
            return None;
        }
        let stem = file_name
            .strip_prefix(self.pattern.prefix.as_str())?
            .strip_suffix(self.pattern.extension.as_str())?
            .strip_suffix('.')?;
        (!stem.is_empty()).then_some(stem)
    }
}

/// A source file handed to the downstream build
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceRef {
    /// File name within the component directory
    pub resource: String,
    pub path: PathBuf,
}

/// One optional, independently includable driver
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogEntry {
    pub name: String,
    pub resource: ResourceRef,
}

/// Every driver available for conditional inclusion, sorted by name
#[derive(Debug, Clone)]
pub struct Catalog {
    directory: PathBuf,
    pattern: NamePattern,
    entries: Vec<CatalogEntry>,
}

impl Catalog {
    /// Scan `directory` for files matching `pattern`
    ///
    /// An unreadable directory is fatal; an empty one is a valid, empty
    /// catalog.
    pub fn load(directory: &Path, pattern: NamePattern) -> Result<Self, CatalogError> {
        let unreadable = |source| CatalogError::Unreadable {
            path: directory.to_path_buf(),
            source,
        };

        let matcher = pattern.matcher()?;
        let mut entries = Vec::new();
        for dir_entry in std::fs::read_dir(directory).map_err(unreadable)? {
            let dir_entry = dir_entry.map_err(unreadable)?;
            let path = dir_entry.path();
            if !path.is_file() {
                continue;
            }
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if let Some(name) = matcher.logical_name(file_name) {
                entries.push(CatalogEntry {
                    name: name.to_string(),
                    resource: ResourceRef {
                        resource: file_name.to_string(),
                        path: path.clone(),
                    },
                });
            }
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));

        info!(
            path = %directory.display(),
            drivers = entries.len(),
            "Loaded driver catalog"
        );

        Ok(Self {
            directory: directory.to_path_buf(),
            pattern,
            entries,
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn pattern(&self) -> &NamePattern {
        &self.pattern
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    /// Entry names in sorted order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|e| e.name == name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Names a declaration may select, i.e. everything except the sentinels
    pub fn selectable(&self, sentinels: &BTreeSet<String>) -> Vec<String> {
        self.names()
            .filter(|name| !sentinels.contains(*name))
            .map(str::to_string)
            .collect()
    }
}

/// Source of the resource files making up a component
pub trait ResourceProvider {
    /// Every resource except the catalog entries named in `exclude`
    fn list_resources(&self, exclude: &BTreeSet<String>) -> Result<Vec<ResourceRef>, CatalogError>;
}

/// Source file extensions compiled by the downstream build
pub const DEFAULT_SOURCE_EXTENSIONS: [&str; 6] = ["c", "cc", "cpp", "h", "hpp", "tcc"];

/// The source files of a component directory
#[derive(Debug, Clone)]
pub struct ComponentManifest {
    directory: PathBuf,
    pattern: NamePattern,
    extensions: Vec<String>,
}

impl ComponentManifest {
    pub fn new(directory: &Path, pattern: NamePattern) -> Self {
        Self {
            directory: directory.to_path_buf(),
            pattern,
            extensions: DEFAULT_SOURCE_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
        }
    }

    /// Replace the list of source file extensions
    pub fn with_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extensions = extensions.into_iter().map(Into::into).collect();
        self
    }

    /// Globs of every source file, one per extension
    fn sources(&self) -> Result<GlobSet, CatalogError> {
        let mut builder = GlobSetBuilder::new();
        for extension in &self.extensions {
            builder.add(compile_glob(format!("*.{}", globset::escape(extension)))?);
        }
        builder.build().map_err(|source| CatalogError::Pattern {
            pattern: self.extensions.join(","),
            source,
        })
    }
}

impl ResourceProvider for ComponentManifest {
    fn list_resources(&self, exclude: &BTreeSet<String>) -> Result<Vec<ResourceRef>, CatalogError> {
        let unreadable = |source| CatalogError::Unreadable {
            path: self.directory.clone(),
            source,
        };
        let sources = self.sources()?;
        let excluded_files: BTreeSet<String> =
            exclude.iter().map(|name| self.pattern.file_name(name)).collect();

        let mut resources = Vec::new();
        for dir_entry in std::fs::read_dir(&self.directory).map_err(unreadable)? {
            let path = dir_entry.map_err(unreadable)?.path();
            if !path.is_file() {
                continue;
            }
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !sources.is_match(file_name) {
                continue;
            }
            if excluded_files.contains(file_name) {
                debug!(resource = file_name, "Excluding unused driver");
                continue;
            }
            resources.push(ResourceRef {
                resource: file_name.to_string(),
                path: path.clone(),
            });
        }
        resources.sort();
        Ok(resources)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn component_dir(files: &[&str]) -> TempDir {
        let dir = TempDir::new().unwrap();
        for file in files {
            std::fs::write(dir.path().join(file), "// source\n").unwrap();
        }
        dir
    }

    #[test]
    fn test_name_pattern() {
        let pattern = NamePattern::default();
        assert_eq!(pattern.glob(), "driver_*.cc");
        let matcher = pattern.matcher().unwrap();
        assert_eq!(matcher.logical_name("driver_apatoreitn40.cc"), Some("apatoreitn40"));
        assert_eq!(matcher.logical_name("driver_.cc"), None);
        assert_eq!(matcher.logical_name("driver_x.cpp"), None);
        assert_eq!(matcher.logical_name("component.cpp"), None);
        assert_eq!(pattern.file_name("auto"), "driver_auto.cc");
    }

    #[test]
    fn test_pattern_metacharacters_are_literal() {
        let pattern = NamePattern {
            prefix: "drv[".to_string(),
            extension: "cc".to_string(),
        };
        let matcher = pattern.matcher().unwrap();
        assert_eq!(matcher.logical_name("drv[kamheat.cc"), Some("kamheat"));
        assert_eq!(matcher.logical_name("drvk.cc"), None);
    }

    #[test]
    fn test_load_sorted() {
        let dir = component_dir(&[
            "driver_multical21.cc",
            "driver_apatoreitn40.cc",
            "driver_unknown.cc",
            "component.cpp",
            "units.h",
        ]);
        let catalog = Catalog::load(dir.path(), NamePattern::default()).unwrap();
        let names: Vec<&str> = catalog.names().collect();
        assert_eq!(names, vec!["apatoreitn40", "multical21", "unknown"]);

        let sentinels = ["auto", "unknown"].iter().map(|s| s.to_string()).collect();
        assert_eq!(catalog.selectable(&sentinels), vec!["apatoreitn40", "multical21"]);
    }

    #[test]
    fn test_empty_directory() {
        let dir = component_dir(&[]);
        let catalog = Catalog::load(dir.path(), NamePattern::default()).unwrap();
        assert!(catalog.is_empty());
    }

    #[test]
    fn test_unreadable_directory() {
        let dir = component_dir(&[]);
        let missing = dir.path().join("missing");
        let err = Catalog::load(&missing, NamePattern::default()).unwrap_err();
        assert!(matches!(err, CatalogError::Unreadable { .. }));
    }

    #[test]
    fn test_manifest_excludes_drivers() {
        let dir = component_dir(&[
            "driver_a.cc",
            "driver_b.cc",
            "driver_auto.cc",
            "component.cpp",
            "component.h",
            "units.py",
        ]);
        let manifest = ComponentManifest::new(dir.path(), NamePattern::default());
        let exclude = ["b", "auto"].iter().map(|s| s.to_string()).collect();

        let resources: Vec<String> = manifest
            .list_resources(&exclude)
            .unwrap()
            .into_iter()
            .map(|r| r.resource)
            .collect();
        assert_eq!(resources, vec!["component.cpp", "component.h", "driver_a.cc"]);
    }
}
