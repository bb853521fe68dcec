//! Experiment configuration.
//!
//! Configs are flat `key: value` files with `#` comments, which is plain
//! YAML; they deserialize into defaulted structs so a partial file is
//! enough to describe a run. A failed load aborts the driver with exit 1.

use serde::{Deserialize, Serialize};

/// Simulation configuration (loaded from YAML)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Master seed; every RNG stream is derived from it
    pub random_seed: u64,
    /// Population size for the non-grid soup mode
    pub soup_size: usize,
    /// Program length L in bytes
    pub program_size: usize,
    /// Number of epoch steps to run
    pub epochs: usize,
    /// Probability of a single-position mutation per program per epoch
    pub mutation_rate: f64,
    /// Initial head0 offset for pair execution
    pub read_head_position: usize,
    /// Initial head1 offset for pair execution (0 means "start of B")
    pub write_head_position: usize,
    /// Cadence of stdout metrics
    pub eval_interval: usize,
    /// Programs to dump when entropy runs high
    pub num_print_programs: usize,
    /// Grid width (enables the 2-D population together with use_grid)
    pub grid_width: usize,
    /// Grid height
    pub grid_height: usize,
    /// Whether to run on the 2-D grid
    pub use_grid: bool,
    /// Snapshot / frame cadence
    pub visualization_interval: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            random_seed: 42,
            soup_size: 128,
            program_size: 64,
            epochs: 1000,
            mutation_rate: 0.001,
            read_head_position: 0,
            write_head_position: 0,
            eval_interval: 10,
            num_print_programs: 5,
            grid_width: 0,
            grid_height: 0,
            use_grid: false,
            visualization_interval: 100,
        }
    }
}

impl Config {
    /// Load a config from a YAML file. When the grid is enabled,
    /// `soup_size` is overridden to `grid_width * grid_height`.
    pub fn from_yaml(path: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = serde_yaml::from_str(&contents)?;

        if config.use_grid && config.grid_width > 0 && config.grid_height > 0 {
            config.soup_size = config.grid_width * config.grid_height;
        }

        Ok(config)
    }

    /// Save a config to a YAML file
    pub fn to_yaml(&self, path: &str) -> Result<(), Box<dyn std::error::Error>> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Validate the configuration; fatal problems return Err
    pub fn validate(&self) -> Result<(), String> {
        if self.program_size == 0 {
            return Err("program_size must be greater than 0".to_string());
        }
        if self.use_grid {
            if self.grid_width == 0 || self.grid_height == 0 {
                return Err("use_grid requires non-zero grid_width and grid_height".to_string());
            }
        } else if self.soup_size < 2 {
            return Err("soup_size must be at least 2".to_string());
        }
        if !(0.0..=1.0).contains(&self.mutation_rate) {
            return Err(format!(
                "mutation_rate {} must lie in [0, 1]",
                self.mutation_rate
            ));
        }
        if self.eval_interval == 0 || self.visualization_interval == 0 {
            return Err("eval_interval and visualization_interval must be at least 1".to_string());
        }
        Ok(())
    }
}

/// Darwin experiment configuration: two grids evolve independently until
/// the barrier is removed, then merge side by side.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DarwinConfig {
    /// Width of each half grid
    pub grid_width: usize,
    pub grid_height: usize,
    pub program_size: usize,
    /// Config file for the left grid during phase 1
    pub left_config: String,
    /// Config file for the right grid during phase 1
    pub right_config: String,
    /// Epoch t1 at which the barrier comes down
    pub barrier_removal_epoch: usize,
    /// Config file for the merged grid during phase 2
    pub merged_config: String,
    /// Epoch t2 at which the experiment ends
    pub final_epoch: usize,
    pub eval_interval: usize,
    pub visualization_interval: usize,
    pub random_seed: u64,
}

impl Default for DarwinConfig {
    fn default() -> Self {
        Self {
            grid_width: 32,
            grid_height: 32,
            program_size: 64,
            left_config: "configs/left_config.yaml".to_string(),
            right_config: "configs/right_config.yaml".to_string(),
            barrier_removal_epoch: 1000,
            merged_config: "configs/merged_config.yaml".to_string(),
            final_epoch: 2000,
            eval_interval: 10,
            visualization_interval: 100,
            random_seed: 42,
        }
    }
}

impl DarwinConfig {
    pub fn from_yaml(path: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)?;
        let config: DarwinConfig = serde_yaml::from_str(&contents)?;
        Ok(config)
    }
}
