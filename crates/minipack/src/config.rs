//! Configuration loading
//!
//! Values are layered, later sources overriding earlier ones:
//! 1. built-in defaults
//! 2. user config (`<config dir>/minipack/minipack.toml`)
//! 3. project config (`minipack.toml` in the working directory, or `--config`)
//! 4. `MINIPACK_*` environment variables
//! 5. command-line flags (applied by the caller)

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use etcetera::{BaseStrategy, choose_base_strategy};
use log::debug;
use serde::Deserialize;

use crate::{code_generator::RuntimeOptions, resolver::ExtensionPolicy};

const CONFIG_FILE_NAME: &str = "minipack.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Extensions probed, in order, for specifiers without one
    pub extensions: Vec<String>,
    /// Resolve a directory specifier to `<dir>/index<ext>`
    pub index_files: bool,
    /// Emit the memoizing runtime (each factory runs at most once)
    pub module_cache: bool,
    /// Emit a path comment above each module factory
    pub module_comments: bool,
    /// Fail the build on any circular import
    pub reject_cycles: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            extensions: vec![".js".to_owned()],
            index_files: false,
            module_cache: true,
            module_comments: true,
            reject_cycles: false,
        }
    }
}

/// On-disk representation, every key optional so files can be partial
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct ConfigFile {
    extensions: Option<Vec<String>>,
    index_files: Option<bool>,
    module_cache: Option<bool>,
    module_comments: Option<bool>,
    reject_cycles: Option<bool>,
}

impl Config {
    /// Load configuration from the standard hierarchy
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(user_path) = user_config_path()
            && user_path.is_file()
        {
            debug!("Loading user config from {}", user_path.display());
            config.merge_file(&user_path)?;
        }

        match explicit_path {
            Some(path) => {
                debug!("Loading config from {}", path.display());
                config.merge_file(path)?;
            }
            None => {
                let project_path = PathBuf::from(CONFIG_FILE_NAME);
                if project_path.is_file() {
                    debug!("Loading project config from {}", project_path.display());
                    config.merge_file(&project_path)?;
                }
            }
        }

        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Overlay the values present in a TOML file
    pub fn merge_file(&mut self, path: &Path) -> Result<()> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let file: ConfigFile = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        self.merge(file)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    fn merge(&mut self, file: ConfigFile) -> Result<()> {
        if let Some(extensions) = file.extensions {
            self.extensions = extensions.into_iter().map(normalize_extension).collect();
            check_extensions(&self.extensions, "`extensions`")?;
        }
        if let Some(index_files) = file.index_files {
            self.index_files = index_files;
        }
        if let Some(module_cache) = file.module_cache {
            self.module_cache = module_cache;
        }
        if let Some(module_comments) = file.module_comments {
            self.module_comments = module_comments;
        }
        if let Some(reject_cycles) = file.reject_cycles {
            self.reject_cycles = reject_cycles;
        }
        Ok(())
    }

    /// Apply `MINIPACK_*` overrides from the process environment
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(value) = std::env::var("MINIPACK_EXTENSIONS") {
            self.extensions = value
                .split(',')
                .map(str::trim)
                .filter(|ext| !ext.is_empty())
                .map(|ext| normalize_extension(ext.to_owned()))
                .collect();
            check_extensions(&self.extensions, "MINIPACK_EXTENSIONS")?;
        }
        if let Some(value) = env_bool("MINIPACK_INDEX_FILES")? {
            self.index_files = value;
        }
        if let Some(value) = env_bool("MINIPACK_MODULE_CACHE")? {
            self.module_cache = value;
        }
        if let Some(value) = env_bool("MINIPACK_MODULE_COMMENTS")? {
            self.module_comments = value;
        }
        if let Some(value) = env_bool("MINIPACK_REJECT_CYCLES")? {
            self.reject_cycles = value;
        }
        Ok(())
    }

    pub fn extension_policy(&self) -> ExtensionPolicy {
        ExtensionPolicy {
            extensions: self.extensions.clone(),
            index_files: self.index_files,
        }
    }

    pub fn runtime_options(&self) -> RuntimeOptions {
        RuntimeOptions {
            module_cache: self.module_cache,
            module_comments: self.module_comments,
        }
    }
}

fn user_config_path() -> Option<PathBuf> {
    choose_base_strategy()
        .ok()
        .map(|strategy| strategy.config_dir().join("minipack").join(CONFIG_FILE_NAME))
}

/// Extensionless specifiers could never resolve against an empty list
fn check_extensions(extensions: &[String], source: &str) -> Result<()> {
    if extensions.is_empty() {
        bail!("{source} must list at least one extension");
    }
    Ok(())
}

/// Accept both `js` and `.js`
pub fn normalize_extension(ext: String) -> String {
    if ext.starts_with('.') {
        ext
    } else {
        format!(".{ext}")
    }
}

fn env_bool(name: &str) -> Result<Option<bool>> {
    let Ok(value) = std::env::var(name) else {
        return Ok(None);
    };
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(Some(true)),
        "0" | "false" | "no" | "off" => Ok(Some(false)),
        other => bail!("Invalid boolean value '{other}' for {name}"),
    }
}

#[cfg(test)]
mod tests {
    use serial_test::serial;
    use tempfile::TempDir;

    use super::*;

    /// Restores an environment variable when dropped
    struct EnvGuard {
        name: &'static str,
        original: Option<String>,
    }

    impl EnvGuard {
        fn set(name: &'static str, value: &str) -> Self {
            let original = std::env::var(name).ok();
            // SAFETY: tests touching the environment are serialized
            unsafe {
                std::env::set_var(name, value);
            }
            Self { name, original }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            // SAFETY: tests touching the environment are serialized
            unsafe {
                match self.original.take() {
                    Some(original) => std::env::set_var(self.name, original),
                    None => std::env::remove_var(self.name),
                }
            }
        }
    }

    #[test]
    fn test_defaults_resolve_plain_js_only() {
        let config = Config::default();
        assert_eq!(config.extensions, vec![".js".to_owned()]);
        assert!(!config.index_files);
        assert!(config.module_cache);
        assert!(!config.reject_cycles);
    }

    #[test]
    fn test_partial_file_overrides_only_present_keys() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("minipack.toml");
        std::fs::write(
            &path,
            "extensions = [\"mjs\", \".js\"]\nreject-cycles = true\n",
        )?;

        let mut config = Config::default();
        config.merge_file(&path)?;

        assert_eq!(config.extensions, vec![".mjs".to_owned(), ".js".to_owned()]);
        assert!(config.reject_cycles);
        assert!(config.module_cache);
        Ok(())
    }

    #[test]
    fn test_unknown_key_is_rejected() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("minipack.toml");
        std::fs::write(&path, "minify = true\n")?;

        let mut config = Config::default();
        assert!(config.merge_file(&path).is_err());
        Ok(())
    }

    #[test]
    #[serial]
    fn test_env_overrides() -> Result<()> {
        let _extensions = EnvGuard::set("MINIPACK_EXTENSIONS", "ts, .js");
        let _cache = EnvGuard::set("MINIPACK_MODULE_CACHE", "off");

        let mut config = Config::default();
        config.apply_env_overrides()?;

        assert_eq!(config.extensions, vec![".ts".to_owned(), ".js".to_owned()]);
        assert!(!config.module_cache);
        Ok(())
    }

    #[test]
    fn test_empty_extension_list_in_file_is_rejected() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("minipack.toml");
        std::fs::write(&path, "extensions = []\n")?;

        let mut config = Config::default();
        let err = config.merge_file(&path).expect_err("empty list must fail");
        assert!(format!("{err:#}").contains("at least one extension"), "{err:#}");
        Ok(())
    }

    #[test]
    #[serial]
    fn test_empty_extension_env_is_rejected() {
        for value in ["", " , ,"] {
            let _guard = EnvGuard::set("MINIPACK_EXTENSIONS", value);
            let mut config = Config::default();
            let err = config
                .apply_env_overrides()
                .expect_err("empty list must fail");
            assert!(err.to_string().contains("MINIPACK_EXTENSIONS"), "{err}");
        }
    }

    #[test]
    #[serial]
    fn test_invalid_env_bool_is_an_error() {
        let _guard = EnvGuard::set("MINIPACK_REJECT_CYCLES", "maybe");
        let mut config = Config::default();
        assert!(config.apply_env_overrides().is_err());
    }
}
