//! Module-loading collaborator: turns files and ambient references into descriptors.
//!
//! - [`metadata`]: reads the assembly manifest out of a managed PE image.
//! - [`ambient`]: probes runtime directories outside the scanned folder.

use std::path::{Path, PathBuf};

use crate::models::{ModuleDescriptor, ModuleReference};

pub mod ambient;
pub mod metadata;

use ambient::AmbientProbe;

/// Result of asking the loader for a module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded(ModuleDescriptor),
    NotFound,
    LoadError(String),
}

pub trait ModuleLoader {
    /// Whether a candidate module file exists.
    fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    /// Load the descriptor of a module file.
    fn load_file(&self, path: &Path) -> LoadOutcome;

    /// Resolve a reference through the ambient runtime environment.
    fn resolve_ambient(&self, reference: &ModuleReference) -> LoadOutcome;
}

/// Find the file for module `stem` in `dir`, trying `extensions` in order.
///
/// Extensions match case-insensitively, the same as top-level discovery, so
/// `Core.DLL` satisfies a reference to `Core` on case-sensitive file systems too.
/// The stem must match exactly.
pub fn find_module_file(
    dir: &Path,
    stem: &str,
    extensions: &[String],
    exists: impl Fn(&Path) -> bool,
) -> Option<PathBuf> {
    let exact = extensions
        .iter()
        .map(|ext| dir.join(format!("{}.{}", stem, ext)))
        .find(|candidate| exists(candidate.as_path()));
    if exact.is_some() {
        return exact;
    }

    let entries: Vec<PathBuf> = std::fs::read_dir(dir)
        .ok()?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.file_stem().and_then(|s| s.to_str()) == Some(stem))
        .collect();
    extensions.iter().find_map(|ext| {
        entries
            .iter()
            .find(|path| {
                path.extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| e.eq_ignore_ascii_case(ext))
                    && exists(path.as_path())
            })
            .cloned()
    })
}

/// Loader backed by the metadata reader and an [`AmbientProbe`].
pub struct FileSystemLoader {
    ambient: AmbientProbe,
}

impl FileSystemLoader {
    pub fn new(ambient: AmbientProbe) -> Self {
        Self { ambient }
    }
}

impl ModuleLoader for FileSystemLoader {
    fn load_file(&self, path: &Path) -> LoadOutcome {
        if !self.exists(path) {
            return LoadOutcome::NotFound;
        }
        match metadata::read_file(path) {
            Ok(descriptor) => LoadOutcome::Loaded(descriptor),
            Err(e) => LoadOutcome::LoadError(e.to_string()),
        }
    }

    fn resolve_ambient(&self, reference: &ModuleReference) -> LoadOutcome {
        match self.ambient.locate(reference.name()) {
            Some(path) => self.load_file(&path),
            None => LoadOutcome::NotFound,
        }
    }
}
