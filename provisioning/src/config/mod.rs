/// Configuration module for the provisioning engine
///
/// Implements layered configuration with the 12-factor app pattern:
/// 1. Defaults (from code)
/// 2. Config file (mgf.toml)
/// 3. Environment variables (MGF_* prefix)
///
/// The engine never loads configuration on its own; callers resolve an
/// [`EngineConfig`] once and hand it to the orchestrators.
///
/// # Example
///
/// ```no_run
/// use mgf_provisioning::config::ConfigLoader;
///
/// let config = ConfigLoader::load_default()?;
/// let config = ConfigLoader::new().with_file("./mgf.toml").load()?;
/// # Ok::<(), mgf_provisioning::config::ConfigError>(())
/// ```
pub mod error;
pub mod loader;

pub use error::{ConfigError, Result};
pub use loader::{ConfigLoader, DomainRoots, EngineConfig, ManifestConfig, SandboxConfig};
