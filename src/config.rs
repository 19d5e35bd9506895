use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::{fmt::Debug, fs, ops::RangeBounds, path::Path};

/// Largest metacommunity size whose neighboring integers an f64 resolves.
const MAX_EXACT_SIZE: u64 = 1 << 53;

/// Run termination mode.
#[derive(Debug, PartialEq, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Pure drift, run until a single species remains.
    Fixation,
    /// Run for exactly `step_budget` steps.
    FixedHorizon,
}

/// Metacommunity and replacement-process parameters.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Fisher's alpha of the metacommunity.
    pub alpha: f64,
    /// Nominal number of individuals in the metacommunity.
    pub metacommunity_size: u64,
    /// Probability that a replacement is an immigrant.
    pub migration_rate: f64,
}

/// Initial condition parameters.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct InitConfig {
    /// Number of individuals in the local community.
    pub local_size: usize,
}

/// Run length and reproducibility parameters.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub mode: RunMode,
    /// Total number of steps: exact for fixed-horizon runs, an upper bound
    /// for fixation runs.
    pub step_budget: u64,
    /// Steps discarded from the front of the richness series when reporting
    /// stationary statistics.
    #[serde(default)]
    pub burn_in: usize,
    /// Base RNG seed; each run mixes in its own index. Seeded from OS
    /// entropy when absent.
    #[serde(default)]
    pub seed: Option<u64>,
}

/// Trajectory output parameters.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Number of steps between trajectory records.
    pub steps_per_save: usize,
    /// Number of records written per trajectory file.
    pub saves_per_file: usize,
    /// Record individual replacement events alongside richness.
    #[serde(default)]
    pub record_events: bool,
}

/// Simulation configuration parameters.
///
/// Loaded from a TOML file and validated before use.
/// See [`Config::from_file`] for loading.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Config {
    pub model: ModelConfig,
    pub init: InitConfig,
    pub run: RunConfig,
    pub output: OutputConfig,
}

impl Config {
    /// Load a [`Config`] from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, deserialized,
    /// or if the configuration values are invalid.
    pub fn from_file<P: AsRef<Path>>(file: P) -> Result<Self> {
        let file = file.as_ref();
        let contents =
            fs::read_to_string(file).with_context(|| format!("failed to read {file:?}"))?;

        let config: Config = toml::from_str(&contents).context("failed to deserialize config")?;

        config.validate().context("failed to validate config")?;

        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if !(self.model.alpha > 0.0) {
            bail!("Fisher's alpha must be positive, but is {}", self.model.alpha);
        }
        check_num(self.model.metacommunity_size, 1..MAX_EXACT_SIZE)
            .context("invalid metacommunity size")?;
        check_num(self.model.migration_rate, 0.0..=1.0).context("invalid migration rate")?;

        check_num(self.init.local_size, 2..=1_000_000).context("invalid local community size")?;

        check_num(self.run.step_budget, 1..).context("invalid step budget")?;
        check_num(self.run.burn_in as u64, 0..self.run.step_budget).context("invalid burn-in")?;
        if self.run.mode == RunMode::Fixation && self.model.migration_rate != 0.0 {
            bail!("fixation mode requires a migration rate of zero");
        }

        check_num(self.output.steps_per_save, 1..=1_000_000)
            .context("invalid number of steps per save")?;
        check_num(self.output.saves_per_file, 1..=10_000)
            .context("invalid number of saves per file")?;

        Ok(())
    }
}

fn check_num<T, R>(num: T, range: R) -> Result<()>
where
    T: PartialOrd + Debug,
    R: RangeBounds<T> + Debug,
{
    if !range.contains(&num) {
        bail!("number must be in the range {range:?}, but is {num:?}");
    }
    Ok(())
}
