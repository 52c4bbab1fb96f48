//! TOML configuration for the capdispatch tool.
//!
//! Lookup order: an explicit `--config` path, then the `CAPDISPATCH_CONFIG`
//! environment variable, then `./capdispatch.toml`, then compiled-in defaults.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::caps::hw::{gpu, HwCaps};
use crate::caps::registry::CapsRegistry;
use crate::caps::select::SelectionProfile;
use crate::kernel::{BackendTier, DeterminismClass};

pub const CONFIG_ENV: &str = "CAPDISPATCH_CONFIG";
pub const LOCAL_CONFIG: &str = "capdispatch.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub selection: SelectionConfig,
    #[serde(default)]
    pub hardware: HardwareConfig,
    #[serde(default)]
    pub kernels: KernelsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded capdispatch configuration");
        Ok(config)
    }

    /// Resolve the configuration. An explicit path must load; the
    /// environment and local-file fallbacks only warn when they fail.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return Ok(cfg),
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "{CONFIG_ENV} set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let local = Path::new(LOCAL_CONFIG);
        if local.exists() {
            match Self::load(local) {
                Ok(cfg) => return Ok(cfg),
                Err(e) => {
                    warn!(
                        path = %local.display(),
                        error = %e,
                        "local config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Ok(Self::default())
    }
}

// ---------------------------------------------------------------------------
// Selection
// ---------------------------------------------------------------------------

/// Product policy for backend selection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionConfig {
    /// Require D0 backends on lockstep-relevant subsystems.
    pub lockstep_strict: bool,
    /// Subsystem (name or numeric id) to forced backend name.
    pub overrides: BTreeMap<String, String>,
}

/// Resolve a subsystem given by name or numeric id.
pub fn subsystem_id(registry: &CapsRegistry, subsystem: &str) -> Result<u32> {
    if let Ok(id) = subsystem.parse::<u32>() {
        return Ok(id);
    }
    match registry.subsystem_id_by_name(subsystem) {
        Some(id) => Ok(id),
        None => bail!("unknown subsystem {subsystem:?}"),
    }
}

impl SelectionConfig {
    pub fn profile(&self, registry: &CapsRegistry) -> Result<SelectionProfile> {
        let mut profile = SelectionProfile {
            lockstep_strict: self.lockstep_strict,
            overrides: Vec::new(),
        };
        for (subsystem, backend) in &self.overrides {
            let id = subsystem_id(registry, subsystem)
                .with_context(|| format!("invalid override {subsystem} = {backend:?}"))?;
            profile = profile.with_override(id, backend.clone());
        }
        Ok(profile)
    }
}

// ---------------------------------------------------------------------------
// Hardware
// ---------------------------------------------------------------------------

/// Adjustments applied on top of the probed host capabilities.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HardwareConfig {
    /// GPU features to declare (`gl2`, `vk1`, `dx9`, `dx11`, `metal`, `compute`).
    pub gpu_features: Vec<String>,
    /// Mask SIMD CPU features off.
    pub disable_simd: bool,
}

impl HardwareConfig {
    pub fn apply(&self, hw: HwCaps) -> Result<HwCaps> {
        let mut declared = 0;
        for name in &self.gpu_features {
            match gpu::from_name(name) {
                Some(flag) => declared |= flag,
                None => bail!("unknown GPU feature {name:?}"),
            }
        }
        let hw = hw.with_gpu_flags(declared);
        Ok(if self.disable_simd { hw.without_simd() } else { hw })
    }
}

// ---------------------------------------------------------------------------
// Kernels
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelsConfig {
    /// Tiers the kernel registry may offer.
    pub backends: Vec<BackendTier>,
    /// Default determinism class for the diagnostic tables.
    pub class: DeterminismClass,
}

impl Default for KernelsConfig {
    fn default() -> Self {
        Self {
            backends: BackendTier::ALL.to_vec(),
            class: DeterminismClass::Strict,
        }
    }
}

impl KernelsConfig {
    pub fn backend_mask(&self) -> u32 {
        self.backends.iter().fold(0, |mask, tier| mask | tier.bit())
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Minimum tracing level (`trace`, `debug`, `info`, `warn`, `error`).
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caps::builtin::register_builtin_backends;
    use crate::caps::descriptor::subsystem;
    use crate::caps::hw::{cpu, os};
    use crate::kernel::tier_mask;

    fn builtin_registry() -> CapsRegistry {
        let mut reg = CapsRegistry::new();
        register_builtin_backends(&mut reg).unwrap();
        reg.finalize().unwrap();
        reg
    }

    #[test]
    fn test_defaults_are_sane() {
        let cfg = Config::default();
        assert!(!cfg.selection.lockstep_strict);
        assert!(cfg.selection.overrides.is_empty());
        assert!(cfg.hardware.gpu_features.is_empty());
        assert_eq!(cfg.kernels.backend_mask(), tier_mask::ALL);
        assert_eq!(cfg.kernels.class, DeterminismClass::Strict);
        assert_eq!(cfg.logging.level, "warn");
    }

    #[test]
    fn test_parse_example_toml() {
        let toml_str = r#"
[selection]
lockstep_strict = true

[selection.overrides]
graphics = "soft"
3 = "null"

[hardware]
gpu_features = ["gl2", "VK1"]
disable_simd = true

[kernels]
backends = ["scalar", "simd"]
class = "derived"

[logging]
level = "debug"
json = true
"#;
        let cfg: Config = toml::from_str(toml_str).unwrap();
        assert!(cfg.selection.lockstep_strict);
        assert_eq!(cfg.selection.overrides["graphics"], "soft");
        assert_eq!(cfg.kernels.backend_mask(), tier_mask::SCALAR | tier_mask::SIMD);
        assert_eq!(cfg.kernels.class, DeterminismClass::Derived);
        assert!(cfg.logging.json);

        let profile = cfg.selection.profile(&builtin_registry()).unwrap();
        assert!(profile.lockstep_strict);
        assert_eq!(profile.override_for(subsystem::GRAPHICS), Some("soft"));
        assert_eq!(profile.override_for(subsystem::UI), Some("null"));

        let hw = cfg
            .hardware
            .apply(HwCaps::new(os::POSIX, cpu::X86_64 | cpu::SSE2 | cpu::AVX2, 0))
            .unwrap();
        assert_eq!(hw.gpu_flags, gpu::GL2 | gpu::VK1);
        assert!(!hw.has_simd());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let cfg: Config = toml::from_str("[logging]\nlevel = \"info\"\n").unwrap();
        assert_eq!(cfg.logging.level, "info");
        assert!(!cfg.logging.json);
        assert_eq!(cfg.kernels.backends, BackendTier::ALL.to_vec());
    }

    #[test]
    fn test_unknown_names_are_rejected() {
        let reg = builtin_registry();
        let mut selection = SelectionConfig::default();
        selection.overrides.insert("audio".into(), "null".into());
        assert!(selection.profile(&reg).is_err());

        let hardware = HardwareConfig {
            gpu_features: vec!["glide".into()],
            disable_simd: false,
        };
        assert!(hardware.apply(HwCaps::default()).is_err());

        assert!(toml::from_str::<Config>("[kernels]\nbackends = [\"fpga\"]\n").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("capdispatch.toml");
        std::fs::write(&path, "[selection]\nlockstep_strict = true\n").unwrap();

        let cfg = Config::resolve(Some(&path)).unwrap();
        assert!(cfg.selection.lockstep_strict);
    }

    #[test]
    fn test_load_missing_file_errors() {
        assert!(Config::resolve(Some(Path::new("/nonexistent/capdispatch.toml"))).is_err());
    }

    #[test]
    fn test_serialization_roundtrip() {
        let cfg = Config::default();
        let toml_str = toml::to_string_pretty(&cfg).unwrap();
        let back: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(back.kernels.backends, cfg.kernels.backends);
        assert_eq!(back.logging.level, cfg.logging.level);
    }
}
