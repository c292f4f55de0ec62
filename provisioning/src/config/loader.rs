use crate::config::error::{ConfigError, Result};
use crate::domains::DomainKey;
use crate::retry::RetryConfig;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Root engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Absolute root path per storage domain
    #[serde(default)]
    pub roots: DomainRoots,

    /// Directory holding the domain templates (and their `seeds/`)
    #[serde(default = "default_templates_dir")]
    pub templates_dir: PathBuf,

    /// Sandbox settings for dry environments
    #[serde(default)]
    pub sandbox: SandboxConfig,

    /// Backoff used when deleting or moving directories on synced roots
    #[serde(default)]
    pub cleanup_retry: RetryConfig,

    /// Manifest persistence
    #[serde(default)]
    pub manifest: ManifestConfig,
}

/// Configured root path per storage domain.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DomainRoots {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dropbox: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lucidlink: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nas: Option<PathBuf>,
}

impl DomainRoots {
    pub fn get(&self, key: DomainKey) -> Option<&Path> {
        match key {
            DomainKey::Dropbox => self.dropbox.as_deref(),
            DomainKey::LucidLink => self.lucidlink.as_deref(),
            DomainKey::Nas => self.nas.as_deref(),
        }
    }

    pub fn set(&mut self, key: DomainKey, path: Option<PathBuf>) {
        match key {
            DomainKey::Dropbox => self.dropbox = path,
            DomainKey::LucidLink => self.lucidlink = path,
            DomainKey::Nas => self.nas = path,
        }
    }
}

/// Sandbox configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Force every domain root to live under `runtime_dir`
    #[serde(default)]
    pub force: bool,

    /// Repo-local runtime directory that bounds the sandbox
    #[serde(default = "default_runtime_dir")]
    pub runtime_dir: PathBuf,
}

/// Manifest configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestConfig {
    /// Write `folder_manifest.json` after Apply/Repair
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_templates_dir() -> PathBuf {
    PathBuf::from("templates")
}
fn default_runtime_dir() -> PathBuf {
    PathBuf::from("runtime")
}
fn default_true() -> bool {
    true
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            force: false,
            runtime_dir: default_runtime_dir(),
        }
    }
}

impl Default for ManifestConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            roots: DomainRoots::default(),
            templates_dir: default_templates_dir(),
            sandbox: SandboxConfig::default(),
            cleanup_retry: RetryConfig::default(),
            manifest: ManifestConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Resolve relative `templates_dir` / `runtime_dir` against `base`.
    pub fn resolve_relative_paths(mut self, base: &Path) -> Self {
        if self.templates_dir.is_relative() {
            self.templates_dir = base.join(&self.templates_dir);
        }
        if self.sandbox.runtime_dir.is_relative() {
            self.sandbox.runtime_dir = base.join(&self.sandbox.runtime_dir);
        }
        self
    }

    /// Check values that the type system cannot express.
    pub fn validate(&self) -> Result<()> {
        for key in DomainKey::all() {
            if let Some(root) = self.roots.get(key)
                && !root.is_absolute()
            {
                return Err(ConfigError::ValidationError(format!(
                    "roots.{} must be an absolute path, got {}",
                    key.as_str(),
                    root.display()
                )));
            }
        }
        if self.sandbox.force && !self.sandbox.runtime_dir.is_absolute() {
            return Err(ConfigError::ValidationError(format!(
                "sandbox.runtime_dir must be absolute when sandbox.force is set, got {}",
                self.sandbox.runtime_dir.display()
            )));
        }
        if self.cleanup_retry.backoff_multiplier < 1.0 {
            return Err(ConfigError::ValidationError(
                "cleanup_retry.backoff_multiplier must be >= 1.0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration loader with layered merging support
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    /// Create a new ConfigLoader
    pub fn new() -> Self {
        Self { config_path: None }
    }

    /// Set the configuration file path
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Load configuration with layered merging:
    /// 1. Start with defaults (from Default implementations)
    /// 2. Merge config file if provided
    /// 3. Override with environment variables (MGF_ prefix)
    ///
    /// Relative directories are resolved against the config file's directory,
    /// or the current directory when no file is given.
    pub fn load(&self) -> Result<EngineConfig> {
        let mut builder = Config::builder();

        // Layer 1: Defaults
        let defaults_json = serde_json::to_string(&EngineConfig::default())?;
        builder = builder.add_source(config::File::from_str(
            &defaults_json,
            config::FileFormat::Json,
        ));

        // Layer 2: Config file
        if let Some(ref path) = self.config_path {
            if path.exists() {
                builder = builder.add_source(File::from(path.as_ref()));
            } else {
                return Err(ConfigError::FileNotFound(path.clone()));
            }
        }

        // Layer 3: Environment variables, e.g. MGF_ROOTS__NAS=/mnt/nas
        builder = builder.add_source(
            Environment::with_prefix("MGF")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let engine_config: EngineConfig = builder.build()?.try_deserialize()?;

        let base = match self.config_path.as_deref().and_then(Path::parent) {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => std::env::current_dir().map_err(|e| {
                ConfigError::LoadError(format!("cannot determine current directory: {e}"))
            })?,
        };
        let engine_config = engine_config.resolve_relative_paths(&base);
        engine_config.validate()?;

        tracing::debug!(
            templates_dir = %engine_config.templates_dir.display(),
            sandbox = engine_config.sandbox.force,
            "Engine configuration loaded"
        );
        Ok(engine_config)
    }

    /// Locate the default config file in standard locations:
    /// 1. Current directory: ./mgf.toml
    /// 2. XDG config: ~/.config/mgf/config.toml
    pub fn find_config_file() -> Option<PathBuf> {
        let cwd_config = PathBuf::from("./mgf.toml");
        if cwd_config.exists() {
            return Some(cwd_config);
        }

        if let Some(config_dir) = dirs::config_dir() {
            let xdg_config = config_dir.join("mgf").join("config.toml");
            if xdg_config.exists() {
                return Some(xdg_config);
            }
        }

        None
    }

    /// Load configuration from default locations
    pub fn load_default() -> Result<EngineConfig> {
        let loader = if let Some(config_path) = Self::find_config_file() {
            ConfigLoader::new().with_file(config_path)
        } else {
            ConfigLoader::new()
        };

        loader.load()
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.roots, DomainRoots::default());
        assert!(!config.sandbox.force);
        assert!(config.manifest.enabled);
        assert_eq!(config.cleanup_retry.max_attempts, 3);
    }

    #[test]
    #[serial]
    fn test_load_with_toml_file() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let dropbox = temp_dir.path().join("dropbox");
        let toml_content = format!(
            r#"
templates_dir = "my_templates"

[roots]
dropbox = "{}"

[cleanup_retry]
max_attempts = 5
"#,
            dropbox.display().to_string().replace('\\', "/")
        );
        let config_path = temp_dir.path().join("mgf.toml");
        std::fs::write(&config_path, toml_content).expect("Failed to write temp file");

        let config = ConfigLoader::new()
            .with_file(&config_path)
            .load()
            .expect("Failed to load config");

        assert_eq!(config.roots.get(DomainKey::Dropbox), Some(dropbox.as_path()));
        assert_eq!(config.roots.get(DomainKey::Nas), None);
        assert_eq!(config.templates_dir, temp_dir.path().join("my_templates"));
        assert_eq!(config.cleanup_retry.max_attempts, 5);
        assert_eq!(config.cleanup_retry.initial_backoff_ms, 100);
    }

    #[test]
    #[serial]
    fn test_env_override() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let nas = temp_dir.path().join("nas");
        unsafe {
            env::set_var("MGF_ROOTS__NAS", &nas);
            env::set_var("MGF_SANDBOX__FORCE", "true");
            env::set_var("MGF_SANDBOX__RUNTIME_DIR", temp_dir.path());
        }

        let result = ConfigLoader::new().load();

        unsafe {
            env::remove_var("MGF_ROOTS__NAS");
            env::remove_var("MGF_SANDBOX__FORCE");
            env::remove_var("MGF_SANDBOX__RUNTIME_DIR");
        }

        let config = result.expect("Failed to load config");
        assert_eq!(config.roots.get(DomainKey::Nas), Some(nas.as_path()));
        assert!(config.sandbox.force);
        assert_eq!(config.sandbox.runtime_dir, temp_dir.path());
    }

    #[test]
    #[serial]
    fn test_relative_root_rejected() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let config_path = temp_dir.path().join("mgf.toml");
        std::fs::write(&config_path, "[roots]\nlucidlink = \"relative/root\"\n")
            .expect("Failed to write");

        let err = ConfigLoader::new()
            .with_file(&config_path)
            .load()
            .unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
        assert!(err.to_string().contains("roots.lucidlink"));
    }

    #[test]
    fn test_missing_file_error() {
        let result = ConfigLoader::new()
            .with_file("/nonexistent/mgf.toml")
            .load();
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_resolve_relative_paths_keeps_absolute() {
        let base = Path::new("/srv/mgf");
        let mut config = EngineConfig::default();
        config.templates_dir = PathBuf::from("/opt/templates");
        let resolved = config.resolve_relative_paths(base);
        assert_eq!(resolved.templates_dir, PathBuf::from("/opt/templates"));
        assert_eq!(resolved.sandbox.runtime_dir, base.join("runtime"));
    }
}
