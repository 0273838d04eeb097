//! Recursive dependency walk.
//!
//! For every declared dependency, in declaration order, the resolver tries the
//! scanned directory first and the ambient probe second, appends exactly one child
//! node to the parent, and records discrepancies in the [`DiscrepancyTracker`].
//!
//! | outcome                                   | node                         | registry |
//! |-------------------------------------------|------------------------------|----------|
//! | local file, declared version              | `Local`, resolved, recursed  | none     |
//! | local file, other version                 | `VersionMismatch`            | issue    |
//! | local file, unreadable                    | `NotFound`                   | issue    |
//! | no local file, ambient at declared version| `Ambient`, resolved          | none     |
//! | no local file, ambient at other version   | `Ambient`, resolved          | redirect |
//! | no local file, no ambient                 | `NotFound`                   | issue    |
//!
//! Ambient modules are never expanded. A local module already on the current
//! descent path is emitted as a `cyclic` back-reference instead of being expanded again.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::loader::{find_module_file, LoadOutcome, ModuleLoader};
use crate::models::{ModuleDescriptor, ModuleReference, ModuleSummary, ResolutionSource};
use crate::tracker::DiscrepancyTracker;

pub struct DependencyResolver<'a, L: ModuleLoader + ?Sized> {
    loader: &'a L,
    extensions: Vec<String>,
    local_cache: HashMap<PathBuf, LoadOutcome>,
    ambient_cache: HashMap<String, LoadOutcome>,
    ancestors: Vec<PathBuf>,
}

impl<'a, L: ModuleLoader + ?Sized> DependencyResolver<'a, L> {
    /// `extensions` are tried in order when looking for a dependency's file.
    pub fn new(loader: &'a L, extensions: Vec<String>) -> Self {
        Self {
            loader,
            extensions,
            local_cache: HashMap::new(),
            ambient_cache: HashMap::new(),
            ancestors: Vec::new(),
        }
    }

    /// Load a module file, parsing each path at most once per resolver.
    pub fn load(&mut self, path: &Path) -> LoadOutcome {
        if let Some(outcome) = self.local_cache.get(path) {
            return outcome.clone();
        }
        let outcome = self.loader.load_file(path);
        self.local_cache.insert(path.to_path_buf(), outcome.clone());
        outcome
    }

    /// Walk the dependencies of a top-level module loaded from `file`.
    pub fn resolve_module(
        &mut self,
        file: &Path,
        descriptor: &ModuleDescriptor,
        search_path: &Path,
        parent: &mut ModuleSummary,
        tracker: &mut DiscrepancyTracker,
    ) {
        self.ancestors.push(file.to_path_buf());
        self.resolve(descriptor, search_path, parent, tracker);
        self.ancestors.pop();
    }

    /// Append one child to `parent` per declared dependency of `descriptor`.
    pub fn resolve(
        &mut self,
        descriptor: &ModuleDescriptor,
        search_path: &Path,
        parent: &mut ModuleSummary,
        tracker: &mut DiscrepancyTracker,
    ) {
        let referrer = descriptor.full_name();

        for dependency in &descriptor.dependencies {
            let child = match self.find_local(search_path, dependency.name()) {
                Some(file) => {
                    self.resolve_local(&file, dependency, &referrer, search_path, tracker)
                }
                None => self.resolve_ambient(dependency, &referrer, tracker),
            };
            parent.children.push(child);
        }
    }

    fn find_local(&self, search_path: &Path, name: &str) -> Option<PathBuf> {
        find_module_file(search_path, name, &self.extensions, |p| self.loader.exists(p))
    }

    fn resolve_local(
        &mut self,
        file: &Path,
        dependency: &ModuleReference,
        referrer: &str,
        search_path: &Path,
        tracker: &mut DiscrepancyTracker,
    ) -> ModuleSummary {
        let key = dependency.identity.clone();

        match self.load(file) {
            LoadOutcome::Loaded(found) if found.identity.version == dependency.version() => {
                let mut child = ModuleSummary::new(key, true, ResolutionSource::Local);
                if self.ancestors.iter().any(|a| a == file) {
                    debug!("cycle back to {}", file.display());
                    child.cyclic = true;
                } else {
                    debug!("{} -> {} (local)", referrer, dependency.full_name());
                    self.resolve_module(file, &found, search_path, &mut child, tracker);
                }
                child
            }
            LoadOutcome::Loaded(found) => {
                debug!(
                    "{} expects {} but {} is {}",
                    referrer,
                    dependency.version(),
                    file.display(),
                    found.identity.version
                );
                tracker.record_issue(key.clone(), referrer);
                ModuleSummary::new(key, false, ResolutionSource::VersionMismatch)
            }
            LoadOutcome::LoadError(reason) => {
                warn!("failed to load {}: {}", file.display(), reason);
                tracker.record_issue(key.clone(), referrer);
                ModuleSummary::new(key, false, ResolutionSource::NotFound)
            }
            // The file was there a moment ago.
            LoadOutcome::NotFound => {
                tracker.record_issue(key.clone(), referrer);
                ModuleSummary::new(key, false, ResolutionSource::NotFound)
            }
        }
    }

    fn resolve_ambient(
        &mut self,
        dependency: &ModuleReference,
        referrer: &str,
        tracker: &mut DiscrepancyTracker,
    ) -> ModuleSummary {
        let key = dependency.identity.clone();
        let full_name = dependency.full_name();

        let outcome = match self.ambient_cache.get(&full_name) {
            Some(outcome) => outcome.clone(),
            None => {
                let outcome = self.loader.resolve_ambient(dependency);
                self.ambient_cache.insert(full_name.clone(), outcome.clone());
                outcome
            }
        };

        match outcome {
            LoadOutcome::Loaded(found) => {
                let actual = found.identity.version;
                if actual != dependency.version() {
                    debug!("{} redirected to {}", full_name, actual);
                    tracker.record_redirect(
                        key.clone(),
                        format!(
                            "{} expected {}, got {}",
                            referrer,
                            dependency.version(),
                            actual
                        ),
                    );
                }
                ModuleSummary::new(key, true, ResolutionSource::Ambient)
            }
            LoadOutcome::NotFound | LoadOutcome::LoadError(_) => {
                warn!("Failed to load {}", full_name);
                tracker.record_issue(key.clone(), referrer);
                ModuleSummary::new(key, false, ResolutionSource::NotFound)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    use crate::models::{ModuleIdentity, Version};

    const DIR: &str = "/bin";

    fn v(major: u16, minor: u16) -> Version {
        Version::new(major, minor, 0, 0)
    }

    fn module(name: &str, version: Version, deps: &[(&str, Version)]) -> ModuleDescriptor {
        ModuleDescriptor::new(
            ModuleIdentity::new(name, version),
            deps.iter()
                .map(|&(n, dv)| ModuleReference::new(n, dv))
                .collect(),
        )
    }

    /// In-memory loader: `files` stand in for `<DIR>/<name>.dll`.
    #[derive(Default)]
    struct MockLoader {
        files: HashMap<PathBuf, LoadOutcome>,
        ambient: HashMap<String, ModuleDescriptor>,
        loads: RefCell<Vec<PathBuf>>,
        ambient_lookups: RefCell<usize>,
    }

    impl MockLoader {
        fn file(mut self, descriptor: ModuleDescriptor) -> Self {
            let path = Path::new(DIR).join(format!("{}.dll", descriptor.identity.name));
            self.files.insert(path, LoadOutcome::Loaded(descriptor));
            self
        }

        fn broken(mut self, name: &str) -> Self {
            let path = Path::new(DIR).join(format!("{}.dll", name));
            self.files
                .insert(path, LoadOutcome::LoadError("bad image".to_string()));
            self
        }

        fn runtime(mut self, descriptor: ModuleDescriptor) -> Self {
            self.ambient
                .insert(descriptor.identity.name.clone(), descriptor);
            self
        }
    }

    impl ModuleLoader for MockLoader {
        fn exists(&self, path: &Path) -> bool {
            self.files.contains_key(path)
        }

        fn load_file(&self, path: &Path) -> LoadOutcome {
            self.loads.borrow_mut().push(path.to_path_buf());
            self.files.get(path).cloned().unwrap_or(LoadOutcome::NotFound)
        }

        fn resolve_ambient(&self, reference: &ModuleReference) -> LoadOutcome {
            *self.ambient_lookups.borrow_mut() += 1;
            match self.ambient.get(reference.name()) {
                Some(d) => LoadOutcome::Loaded(d.clone()),
                None => LoadOutcome::NotFound,
            }
        }
    }

    fn walk(loader: &MockLoader, app: &ModuleDescriptor) -> (ModuleSummary, DiscrepancyTracker) {
        let mut resolver = DependencyResolver::new(loader, vec!["dll".to_string()]);
        let mut root = ModuleSummary::root(app.identity.clone());
        let mut tracker = DiscrepancyTracker::new();
        let file = Path::new(DIR).join(format!("{}.dll", app.identity.name));
        resolver.resolve_module(&file, app, Path::new(DIR), &mut root, &mut tracker);
        (root, tracker)
    }

    fn key(name: &str, version: Version) -> ModuleIdentity {
        ModuleIdentity::new(name, version)
    }

    #[test]
    fn test_local_match_is_resolved_and_expanded() {
        let app = module("App", v(1, 0), &[("Core", v(2, 0))]);
        let loader = MockLoader::default()
            .file(app.clone())
            .file(module("Core", v(2, 0), &[("Base", v(1, 0))]))
            .file(module("Base", v(1, 0), &[]));

        let (root, tracker) = walk(&loader, &app);

        let core = &root.children[0];
        assert_eq!(core.identity, key("Core", v(2, 0)));
        assert!(core.resolved);
        assert_eq!(core.source, ResolutionSource::Local);
        assert_eq!(core.children.len(), 1);
        assert_eq!(core.children[0].identity.name, "Base");
        assert_eq!(core.children[0].source, ResolutionSource::Local);
        assert_eq!(tracker.issue_count(), 0);
        assert_eq!(tracker.redirect_count(), 0);
    }

    #[test]
    fn test_missing_everywhere_is_an_issue() {
        let app = module("App", v(1, 0), &[("Missing", v(1, 0))]);
        let loader = MockLoader::default().file(app.clone());

        let (root, tracker) = walk(&loader, &app);

        let child = &root.children[0];
        assert!(!child.resolved);
        assert_eq!(child.source, ResolutionSource::NotFound);
        assert_eq!(tracker.issue_count(), 1);
        let referrers = &tracker.issues()[&key("Missing", v(1, 0))];
        assert!(referrers.contains(&app.full_name()));
        assert_eq!(*loader.ambient_lookups.borrow(), 1);
    }

    #[test]
    fn test_local_version_mismatch_is_an_issue_and_not_expanded() {
        let app = module("App", v(1, 0), &[("Core", v(2, 0))]);
        let loader = MockLoader::default()
            .file(app.clone())
            .file(module("Core", v(3, 0), &[("Gone", v(1, 0))]));

        let (root, tracker) = walk(&loader, &app);

        let core = &root.children[0];
        assert!(!core.resolved);
        assert_eq!(core.source, ResolutionSource::VersionMismatch);
        assert_eq!(core.identity.version, v(2, 0));
        assert!(core.children.is_empty());
        assert_eq!(tracker.issue_count(), 1);
        assert!(tracker.issues().contains_key(&key("Core", v(2, 0))));
        assert!(!tracker.issues().contains_key(&key("Gone", v(1, 0))));
    }

    #[test]
    fn test_local_load_failure_does_not_fall_back_to_ambient() {
        let app = module("App", v(1, 0), &[("Core", v(2, 0))]);
        let loader = MockLoader::default()
            .file(app.clone())
            .broken("Core")
            .runtime(module("Core", v(2, 0), &[]));

        let (root, tracker) = walk(&loader, &app);

        assert_eq!(root.children[0].source, ResolutionSource::NotFound);
        assert!(!root.children[0].resolved);
        assert_eq!(tracker.issue_count(), 1);
        assert_eq!(*loader.ambient_lookups.borrow(), 0);
    }

    #[test]
    fn test_ambient_redirect_is_not_an_issue() {
        let app = module("App", v(1, 0), &[("Util", v(1, 5))]);
        let loader = MockLoader::default()
            .file(app.clone())
            .runtime(module("Util", v(1, 7), &[("Deeper", v(9, 9))]));

        let (root, tracker) = walk(&loader, &app);

        let util = &root.children[0];
        assert!(util.resolved);
        assert_eq!(util.source, ResolutionSource::Ambient);
        assert!(util.children.is_empty());
        assert_eq!(tracker.issue_count(), 0);
        let details: Vec<&String> = tracker.redirects()[&key("Util", v(1, 5))].iter().collect();
        assert_eq!(
            details,
            vec![&format!("{} expected 1.5.0.0, got 1.7.0.0", app.full_name())]
        );
    }

    #[test]
    fn test_ambient_at_declared_version_records_nothing() {
        let app = module("App", v(1, 0), &[("System.Runtime", v(8, 0))]);
        let loader = MockLoader::default()
            .file(app.clone())
            .runtime(module("System.Runtime", v(8, 0), &[]));

        let (root, tracker) = walk(&loader, &app);

        assert_eq!(root.children[0].source, ResolutionSource::Ambient);
        assert_eq!(tracker.issue_count(), 0);
        assert_eq!(tracker.redirect_count(), 0);
    }

    #[test]
    fn test_children_follow_declaration_order() {
        let app = module(
            "App",
            v(1, 0),
            &[("Zeta", v(1, 0)), ("Alpha", v(1, 0)), ("Mid", v(1, 0))],
        );
        let loader = MockLoader::default()
            .file(app.clone())
            .file(module("Zeta", v(1, 0), &[]))
            .runtime(module("Mid", v(1, 0), &[]));

        let (root, _) = walk(&loader, &app);

        let names: Vec<&str> = root.children.iter().map(|c| c.identity.name.as_str()).collect();
        assert_eq!(names, vec!["Zeta", "Alpha", "Mid"]);
        let sources: Vec<ResolutionSource> = root.children.iter().map(|c| c.source).collect();
        assert_eq!(
            sources,
            vec![
                ResolutionSource::Local,
                ResolutionSource::NotFound,
                ResolutionSource::Ambient
            ]
        );
    }

    #[test]
    fn test_cycle_is_cut_with_back_reference() {
        let app = module("A", v(1, 0), &[("B", v(1, 0))]);
        let loader = MockLoader::default()
            .file(app.clone())
            .file(module("B", v(1, 0), &[("A", v(1, 0))]));

        let (root, tracker) = walk(&loader, &app);

        let b = &root.children[0];
        assert!(!b.cyclic);
        let back = &b.children[0];
        assert_eq!(back.identity.name, "A");
        assert!(back.cyclic);
        assert!(back.resolved);
        assert!(back.children.is_empty());
        assert_eq!(tracker.issue_count(), 0);
    }

    #[test]
    fn test_self_reference_is_a_cycle() {
        let app = module("Loop", v(1, 0), &[("Loop", v(1, 0))]);
        let loader = MockLoader::default().file(app.clone());

        let (root, _) = walk(&loader, &app);

        assert!(root.children[0].cyclic);
    }

    #[test]
    fn test_diamond_is_expanded_per_reference_but_loaded_once() {
        let app = module("App", v(1, 0), &[("Left", v(1, 0)), ("Right", v(1, 0))]);
        let loader = MockLoader::default()
            .file(app.clone())
            .file(module("Left", v(1, 0), &[("Shared", v(1, 0))]))
            .file(module("Right", v(1, 0), &[("Shared", v(1, 0))]))
            .file(module("Shared", v(1, 0), &[("Missing", v(1, 0))]));

        let (root, tracker) = walk(&loader, &app);

        for side in &root.children {
            assert_eq!(side.children[0].identity.name, "Shared");
            assert!(!side.children[0].cyclic);
            assert_eq!(side.children[0].children[0].source, ResolutionSource::NotFound);
        }
        let shared_loads = loader
            .loads
            .borrow()
            .iter()
            .filter(|p| p.ends_with("Shared.dll"))
            .count();
        assert_eq!(shared_loads, 1);
        assert_eq!(*loader.ambient_lookups.borrow(), 1);
        assert_eq!(tracker.issues()[&key("Missing", v(1, 0))].len(), 1);
    }

    #[test]
    fn test_walk_is_deterministic() {
        let app = module(
            "App",
            v(1, 0),
            &[("Core", v(2, 0)), ("Util", v(1, 5)), ("Missing", v(1, 0))],
        );
        let build = || {
            MockLoader::default()
                .file(app.clone())
                .file(module("Core", v(2, 0), &[("Util", v(1, 5))]))
                .runtime(module("Util", v(1, 7), &[]))
        };

        let first = walk(&build(), &app);
        let second = walk(&build(), &app);
        assert_eq!(first, second);
    }
}
