use std::path::{Component, Path, PathBuf};

use log::{debug, trace};
use rustc_hash::FxHashMap;

use crate::error::BuildError;

/// How a specifier is completed into a file path
///
/// The default reproduces the classic single-extension rule: a specifier
/// without an extension gets `.js` appended, nothing else is probed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionPolicy {
    /// Appended, in order, to paths that have no extension
    pub extensions: Vec<String>,
    /// Resolve a directory to `<dir>/index<ext>`
    pub index_files: bool,
}

impl Default for ExtensionPolicy {
    fn default() -> Self {
        Self {
            extensions: vec![".js".to_owned()],
            index_files: false,
        }
    }
}

impl ExtensionPolicy {
    /// Paths to try, in order, for an already joined specifier
    fn candidates(&self, joined: &Path) -> Vec<PathBuf> {
        let mut candidates = Vec::new();
        if joined.extension().is_some() {
            candidates.push(joined.to_path_buf());
        } else {
            for ext in &self.extensions {
                let mut with_ext = joined.as_os_str().to_owned();
                with_ext.push(ext);
                candidates.push(PathBuf::from(with_ext));
            }
        }
        if self.index_files {
            for ext in &self.extensions {
                candidates.push(joined.join(format!("index{ext}")));
            }
        }
        candidates
    }
}

/// Maps import specifiers to canonical file paths
#[derive(Debug)]
pub struct ModuleResolver {
    policy: ExtensionPolicy,
    /// Cache keyed by (importer directory, specifier)
    cache: FxHashMap<(PathBuf, String), PathBuf>,
}

impl Default for ModuleResolver {
    fn default() -> Self {
        Self::new(ExtensionPolicy::default())
    }
}

impl ModuleResolver {
    pub fn new(policy: ExtensionPolicy) -> Self {
        Self {
            policy,
            cache: FxHashMap::default(),
        }
    }

    pub fn policy(&self) -> &ExtensionPolicy {
        &self.policy
    }

    /// Resolve the entry path given on the command line
    ///
    /// The entry is taken relative to the working directory and goes through
    /// the same extension policy as any other specifier.
    pub fn resolve_entry(&mut self, entry: &Path) -> Result<PathBuf, BuildError> {
        let base = std::env::current_dir().map_err(|err| {
            BuildError::resolution(
                entry.display().to_string(),
                None,
                format!("cannot read working directory: {err}"),
            )
        })?;
        self.resolve_from_dir(&entry.to_string_lossy(), &base, None)
    }

    /// Resolve `specifier` as written in the module at `importer`
    pub fn resolve(&mut self, specifier: &str, importer: &Path) -> Result<PathBuf, BuildError> {
        let base = importer.parent().unwrap_or_else(|| Path::new("/"));
        self.resolve_from_dir(specifier, base, Some(importer))
    }

    fn resolve_from_dir(
        &mut self,
        specifier: &str,
        base: &Path,
        importer: Option<&Path>,
    ) -> Result<PathBuf, BuildError> {
        let key = (base.to_path_buf(), specifier.to_owned());
        if let Some(cached) = self.cache.get(&key) {
            trace!("Resolver cache hit for '{specifier}' in {}", base.display());
            return Ok(cached.clone());
        }

        let joined = normalize(&base.join(specifier));
        let candidates = self.policy.candidates(&joined);
        for candidate in &candidates {
            if !candidate.is_file() {
                continue;
            }
            return match candidate.canonicalize() {
                Ok(canonical) => {
                    debug!("Resolved '{specifier}' to {}", canonical.display());
                    self.cache.insert(key, canonical.clone());
                    Ok(canonical)
                }
                Err(err) => Err(BuildError::resolution(
                    specifier,
                    importer.map(Path::to_path_buf),
                    format!("cannot canonicalize {}: {err}", candidate.display()),
                )),
            };
        }

        let tried = candidates
            .iter()
            .map(|candidate| candidate.display().to_string())
            .collect::<Vec<_>>()
            .join(", ");
        Err(BuildError::resolution(
            specifier,
            importer.map(Path::to_path_buf),
            format!("no such file (tried {tried})"),
        ))
    }
}

/// Lexically collapse `.` and `..` so that probing and error messages use
/// clean paths; symlinks are settled later by canonicalization
fn normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    normalized.push(component);
                }
            }
            other => normalized.push(other),
        }
    }
    normalized
}
