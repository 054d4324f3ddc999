//! Configuration for quantizers: histogram resolution, scheme tuning and
//! simulation settings, with JSON file support and a process-wide default.

use lazy_static::lazy_static;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use crate::error::{QuantError, QuantResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramConfig {
    pub num_buckets: usize,
}

impl Default for HistogramConfig {
    fn default() -> Self {
        Self {
            num_buckets: 512,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PercentileConfig {
    /// Percentage of the distribution kept, in (50, 100]
    pub percentile: f64,
}

impl Default for PercentileConfig {
    fn default() -> Self {
        Self {
            percentile: 99.99,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TfEnhancedConfig {
    /// Number of abs-max candidates tried for symmetric grids
    pub symmetric_candidates: usize,
    /// Steps per side tried for asymmetric grids (grid^2 candidates)
    pub asymmetric_grid: usize,
    /// Weight of squared error contributed by clipped values
    pub clip_penalty: f64,
}

impl Default for TfEnhancedConfig {
    fn default() -> Self {
        Self {
            symmetric_candidates: 100,
            asymmetric_grid: 20,
            clip_penalty: 3.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub stochastic_seed: u64,
    /// Elements per kernel chunk; also the stochastic rounding stream granularity
    pub chunk_size: usize,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            stochastic_seed: 0x5eed,
            chunk_size: 4096,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct QuantizerConfig {
    #[serde(default)]
    pub histogram: HistogramConfig,
    #[serde(default)]
    pub percentile: PercentileConfig,
    #[serde(default)]
    pub tf_enhanced: TfEnhancedConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
}

impl QuantizerConfig {
    pub fn validate(&self) -> QuantResult<()> {
        if self.histogram.num_buckets == 0 {
            return Err(QuantError::ConfigurationError(
                "histogram.num_buckets must be positive".to_string(),
            ));
        }
        let p = self.percentile.percentile;
        if !(p > 50.0 && p <= 100.0) {
            return Err(QuantError::ConfigurationError(format!(
                "percentile.percentile must be in (50, 100], got {}",
                p
            )));
        }
        if self.tf_enhanced.symmetric_candidates == 0 || self.tf_enhanced.asymmetric_grid == 0 {
            return Err(QuantError::ConfigurationError(
                "tf_enhanced candidate counts must be positive".to_string(),
            ));
        }
        if !(self.tf_enhanced.clip_penalty >= 0.0) {
            return Err(QuantError::ConfigurationError(
                "tf_enhanced.clip_penalty must be non-negative".to_string(),
            ));
        }
        if self.simulation.chunk_size == 0 {
            return Err(QuantError::ConfigurationError(
                "simulation.chunk_size must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Loads and saves a `QuantizerConfig` as JSON
pub struct ConfigManager {
    config: QuantizerConfig,
    config_file: Option<PathBuf>,
}

impl ConfigManager {
    pub fn new() -> Self {
        Self {
            config: QuantizerConfig::default(),
            config_file: None,
        }
    }

    pub fn with_config_file(mut self, path: PathBuf) -> Self {
        self.config_file = Some(path);
        self
    }

    pub fn load_from_file(&mut self, path: &Path) -> QuantResult<()> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            QuantError::ConfigurationError(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        let config: QuantizerConfig = serde_json::from_str(&content)?;
        config.validate()?;

        self.config = config;
        self.config_file = Some(path.to_path_buf());

        tracing::info!("Configuration loaded from {:?}", path);
        Ok(())
    }

    pub fn save_to_file(&self, path: &Path) -> QuantResult<()> {
        let content = serde_json::to_string_pretty(&self.config)?;
        std::fs::write(path, content)?;

        tracing::info!("Configuration saved to {:?}", path);
        Ok(())
    }

    pub fn get_config(&self) -> QuantizerConfig {
        self.config.clone()
    }

    /// Apply `f`, validate, and persist to the attached file if any.
    /// The previous config is kept when validation fails.
    pub fn update_config<F>(&mut self, f: F) -> QuantResult<()>
    where
        F: FnOnce(&mut QuantizerConfig),
    {
        let mut candidate = self.config.clone();
        f(&mut candidate);
        candidate.validate()?;
        self.config = candidate;

        if let Some(ref path) = self.config_file {
            self.save_to_file(path)?;
        }

        Ok(())
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

lazy_static! {
    static ref CONFIG_MANAGER: RwLock<ConfigManager> = RwLock::new(ConfigManager::new());
}

/// Get the process-wide default configuration
pub fn get_config() -> QuantizerConfig {
    CONFIG_MANAGER.read().get_config()
}

/// Update the process-wide default configuration
pub fn update_config<F>(f: F) -> QuantResult<()>
where
    F: FnOnce(&mut QuantizerConfig),
{
    CONFIG_MANAGER.write().update_config(f)
}

/// Replace the process-wide default configuration with a file's contents
pub fn load_config_from_file(path: &Path) -> QuantResult<()> {
    CONFIG_MANAGER.write().load_from_file(path)
}

/// Create a configuration builder for easy setup
pub struct ConfigBuilder {
    config: QuantizerConfig,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: QuantizerConfig::default(),
        }
    }

    pub fn histogram(mut self, f: impl FnOnce(&mut HistogramConfig)) -> Self {
        f(&mut self.config.histogram);
        self
    }

    pub fn percentile(mut self, f: impl FnOnce(&mut PercentileConfig)) -> Self {
        f(&mut self.config.percentile);
        self
    }

    pub fn tf_enhanced(mut self, f: impl FnOnce(&mut TfEnhancedConfig)) -> Self {
        f(&mut self.config.tf_enhanced);
        self
    }

    pub fn simulation(mut self, f: impl FnOnce(&mut SimulationConfig)) -> Self {
        f(&mut self.config.simulation);
        self
    }

    pub fn build(self) -> QuantResult<QuantizerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
