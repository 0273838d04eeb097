use std::path::{Path, PathBuf};

use tracing::debug;

use super::find_module_file;
use crate::models::Version;

/// Ordered list of directories standing in for the runtime's own module lookup.
#[derive(Debug, Clone, Default)]
pub struct AmbientProbe {
    dirs: Vec<PathBuf>,
    extensions: Vec<String>,
}

impl AmbientProbe {
    pub fn new(dirs: Vec<PathBuf>, extensions: Vec<String>) -> Self {
        Self { dirs, extensions }
    }

    /// A probe that never resolves anything.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn dirs(&self) -> &[PathBuf] {
        &self.dirs
    }

    /// First `<name>.<ext>` found, searching directories in order, then extensions in order.
    pub fn locate(&self, name: &str) -> Option<PathBuf> {
        self.dirs
            .iter()
            .find_map(|dir| find_module_file(dir, name, &self.extensions, |p| p.is_file()))
    }
}

/// Newest version directory of every shared framework under each installed runtime root.
pub fn discover_runtime_dirs() -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    for root in runtime_roots() {
        let found = shared_framework_dirs(&root);
        if !found.is_empty() {
            debug!("runtime root {} provides {} framework(s)", root.display(), found.len());
        }
        for dir in found {
            if !dirs.contains(&dir) {
                dirs.push(dir);
            }
        }
    }
    dirs
}

/// Candidate install roots: `DOTNET_ROOT`, then the platform defaults, then `~/.dotnet`.
fn runtime_roots() -> Vec<PathBuf> {
    let mut roots = Vec::new();
    if let Some(root) = std::env::var_os("DOTNET_ROOT") {
        roots.push(PathBuf::from(root));
    }
    if cfg!(windows) {
        roots.push(PathBuf::from(r"C:\Program Files\dotnet"));
    } else if cfg!(target_os = "macos") {
        roots.push(PathBuf::from("/usr/local/share/dotnet"));
    } else {
        roots.push(PathBuf::from("/usr/share/dotnet"));
        roots.push(PathBuf::from("/usr/lib/dotnet"));
    }
    if let Some(home) = dirs::home_dir() {
        roots.push(home.join(".dotnet"));
    }
    roots
}

/// `<root>/shared/<framework>/<newest version>` for each framework, sorted by framework name.
pub fn shared_framework_dirs(root: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(root.join("shared")) else {
        return Vec::new();
    };

    let mut frameworks: Vec<PathBuf> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    frameworks.sort();

    frameworks
        .iter()
        .filter_map(|framework| newest_version_dir(framework))
        .collect()
}

fn newest_version_dir(framework: &Path) -> Option<PathBuf> {
    std::fs::read_dir(framework)
        .ok()?
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .filter_map(|p| {
            let name = p.file_name()?.to_str()?;
            // Prerelease suffixes ("8.0.0-rc.1") rank by their numeric part.
            let version: Version = name.split('-').next()?.parse().ok()?;
            Some((version, p))
        })
        .max_by(|a, b| a.0.cmp(&b.0))
        .map(|(_, p)| p)
}
