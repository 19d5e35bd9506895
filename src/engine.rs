use crate::config::{Config, RunMode};
use crate::metacommunity::Metacommunity;
use crate::model::{Record, State, StepEvent};
use anyhow::{Context, Result, bail};
use rand::prelude::*;
use rand_chacha::ChaCha12Rng;
use rand_distr::Uniform;
use rmp_serde::{decode, encode};
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::Path,
};

/// Simulation engine.
///
/// Holds the configuration, the metacommunity, the current state, and the
/// random number generator, and provides methods to initialize, run, save,
/// and load simulations.
#[derive(Serialize, Deserialize)]
pub struct Engine {
    cfg: Config,
    meta: Metacommunity,
    state: State,
    rng: ChaCha12Rng,
}

impl Engine {
    /// Create a new `Engine` with the given configuration, a freshly sampled
    /// metacommunity, and a local community drawn from it.
    pub fn generate_initial_condition(cfg: Config, run_idx: usize) -> Result<Self> {
        let mut rng = match cfg.run.seed {
            // Each run derives its own stream from the base seed.
            Some(seed) => ChaCha12Rng::seed_from_u64(seed.wrapping_add(run_idx as u64)),
            None => ChaCha12Rng::try_from_os_rng()?,
        };

        let meta = Metacommunity::build(cfg.model.alpha, cfg.model.metacommunity_size, &mut rng)
            .context("failed to build metacommunity")?;
        log::info!(
            "metacommunity holds {} species across {} individuals",
            meta.species_count(),
            meta.total()
        );

        let community = meta
            .sample_community(cfg.init.local_size, &mut rng)
            .context("failed to sample initial community")?;
        log::info!("initial community richness is {}", community.richness());

        let state = State { step: 0, community };

        Ok(Self {
            cfg,
            meta,
            state,
            rng,
        })
    }

    pub fn cfg(&self) -> &Config {
        &self.cfg
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    /// Whether the run has nothing left to do: fixation reached, or the
    /// step budget consumed in fixed-horizon mode.
    pub fn run_complete(&self) -> bool {
        match self.cfg.run.mode {
            RunMode::Fixation => self.absorbed(),
            RunMode::FixedHorizon => self.state.step >= self.cfg.run.step_budget,
        }
    }

    fn absorbed(&self) -> bool {
        self.cfg.model.migration_rate == 0.0 && self.state.community.richness() == 1
    }

    /// Perform up to one trajectory file worth of steps and save the
    /// resulting records to `file`.
    pub fn perform_simulation<P: AsRef<Path>>(&mut self, file: P) -> Result<()> {
        let file = file.as_ref();
        let file = File::create(file).with_context(|| format!("failed to create {file:?}"))?;
        let mut writer = BufWriter::new(file);

        for i_save in 0..self.cfg.output.saves_per_file {
            let mut richness = Vec::with_capacity(self.cfg.output.steps_per_save);
            let mut events = Vec::new();

            for _ in 0..self.cfg.output.steps_per_save {
                if self.run_complete() {
                    break;
                }
                if self.state.step >= self.cfg.run.step_budget {
                    bail!(
                        "step budget {} exhausted before fixation; raise run.step_budget",
                        self.cfg.run.step_budget
                    );
                }

                let event = self.perform_step().context("failed to perform step")?;
                richness.push(self.state.community.richness() as u32);
                if self.cfg.output.record_events {
                    events.push(event);
                }
            }

            let record = Record {
                step: self.state.step,
                richness,
                events,
                absorbed: self.absorbed(),
                state: self.state.clone(),
            };
            encode::write(&mut writer, &record).context("failed to serialize record")?;

            let progress = 100.0 * (i_save + 1) as f64 / self.cfg.output.saves_per_file as f64;
            log::info!("completed {progress:06.2}%");

            if self.run_complete() {
                log::info!("run complete at step {}", self.state.step);
                break;
            }
        }

        writer.flush().context("failed to flush writer stream")?;

        Ok(())
    }

    /// Save a checkpoint of the entire engine state.
    ///
    /// Can be used to resume the simulation later.
    pub fn save_checkpoint<P: AsRef<Path>>(&self, file: P) -> Result<()> {
        let file = file.as_ref();
        let file = File::create(file).with_context(|| format!("failed to create {file:?}"))?;
        let mut writer = BufWriter::new(file);
        encode::write(&mut writer, &self).context("failed to serialize engine")?;
        Ok(())
    }

    /// Load a previously saved engine checkpoint.
    pub fn load_checkpoint<P: AsRef<Path>>(file: P) -> Result<Self> {
        let file = file.as_ref();
        let file = File::open(file).with_context(|| format!("failed to open {file:?}"))?;
        let mut reader = BufReader::new(file);
        let engine = decode::from_read(&mut reader).context("failed to deserialize engine")?;
        Ok(engine)
    }

    /// Replace one individual: a uniformly chosen member dies and its slot
    /// is filled either by the offspring of a surviving member or, with
    /// probability `migration_rate`, by an immigrant drawn from the
    /// metacommunity.
    ///
    /// Consumes exactly three random draws, in all branches.
    fn perform_step(&mut self) -> Result<StepEvent> {
        let n = self.state.community.len();

        let pos = Uniform::new(0, n)?.sample(&mut self.rng);
        let u: f64 = self.rng.random();

        let immigrant = u < self.cfg.model.migration_rate;
        let recruited = if immigrant {
            self.meta
                .recruit(&mut self.rng)
                .context("failed to draw an immigrant")?
        } else {
            // Uniform over the n - 1 survivors, skipping the dying member.
            let mut donor = Uniform::new(0, n - 1)?.sample(&mut self.rng);
            if donor >= pos {
                donor += 1;
            }
            self.state.community.member(donor)
        };

        let died = self.state.community.replace(pos, recruited);
        self.state.step += 1;

        Ok(StepEvent {
            step: self.state.step,
            position: pos,
            died,
            recruited,
            immigrant,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{InitConfig, ModelConfig, OutputConfig, RunConfig};
    use crate::model::{Community, SpeciesId};
    use std::collections::BTreeSet;

    fn test_config(mode: RunMode, migration_rate: f64, local_size: usize) -> Config {
        Config {
            model: ModelConfig {
                alpha: 10.0,
                metacommunity_size: 10_000,
                migration_rate,
            },
            init: InitConfig { local_size },
            run: RunConfig {
                mode,
                step_budget: 1_000_000,
                burn_in: 0,
                seed: Some(42),
            },
            output: OutputConfig {
                steps_per_save: 128,
                saves_per_file: 8,
                record_events: false,
            },
        }
    }

    fn members_of(engine: &Engine) -> Vec<SpeciesId> {
        let community = &engine.state().community;
        (0..community.len()).map(|pos| community.member(pos)).collect()
    }

    #[test]
    fn step_changes_exactly_one_position() {
        let cfg = test_config(RunMode::FixedHorizon, 0.3, 32);
        let mut engine = Engine::generate_initial_condition(cfg, 0).unwrap();

        for _ in 0..500 {
            let before = members_of(&engine);
            let event = engine.perform_step().unwrap();

            let after = members_of(&engine);
            assert_eq!(after.len(), before.len());
            assert_eq!(before[event.position], event.died);
            assert_eq!(after[event.position], event.recruited);
            for pos in 0..before.len() {
                if pos != event.position {
                    assert_eq!(before[pos], after[pos]);
                }
            }
        }
    }

    #[test]
    fn pure_drift_richness_is_non_increasing() {
        let cfg = test_config(RunMode::Fixation, 0.0, 32);
        let mut engine = Engine::generate_initial_condition(cfg, 0).unwrap();

        let mut richness = engine.state().community.richness();
        for _ in 0..2000 {
            if engine.run_complete() {
                break;
            }
            let event = engine.perform_step().unwrap();
            assert!(!event.immigrant);

            let next = engine.state().community.richness();
            assert!(next <= richness);
            richness = next;
        }
    }

    #[test]
    fn pure_drift_fixates_on_an_initial_species() {
        let cfg = test_config(RunMode::Fixation, 0.0, 5);
        let mut rng = ChaCha12Rng::seed_from_u64(17);
        let meta =
            Metacommunity::build(cfg.model.alpha, cfg.model.metacommunity_size, &mut rng).unwrap();

        // Five individuals, five species, one each.
        let community = Community::new((0..5).map(SpeciesId).collect());
        let initial: BTreeSet<SpeciesId> = community.counts().keys().copied().collect();
        let state = State { step: 0, community };
        let mut engine = Engine {
            cfg,
            meta,
            state,
            rng,
        };

        while !engine.run_complete() {
            assert!(engine.state().step < 100_000, "fixation took too long");
            engine.perform_step().unwrap();
        }

        let counts = engine.state().community.counts();
        assert_eq!(counts.len(), 1);
        let (&survivor, &count) = counts.iter().next().unwrap();
        assert_eq!(count, 5);
        assert!(initial.contains(&survivor));
    }

    #[test]
    fn full_migration_only_recruits_immigrants() {
        let cfg = test_config(RunMode::FixedHorizon, 1.0, 16);
        let mut engine = Engine::generate_initial_condition(cfg, 0).unwrap();

        for _ in 0..500 {
            let event = engine.perform_step().unwrap();
            assert!(event.immigrant);
        }
    }

    #[test]
    fn identical_seeds_yield_identical_runs() {
        let cfg = test_config(RunMode::FixedHorizon, 0.2, 32);
        let mut engine_a = Engine::generate_initial_condition(cfg.clone(), 3).unwrap();
        let mut engine_b = Engine::generate_initial_condition(cfg, 3).unwrap();

        for _ in 0..1000 {
            engine_a.perform_step().unwrap();
            engine_b.perform_step().unwrap();
            assert_eq!(
                engine_a.state().community.richness(),
                engine_b.state().community.richness()
            );
        }
        assert_eq!(
            engine_a.state().community.counts(),
            engine_b.state().community.counts()
        );
    }

    #[test]
    fn checkpoint_round_trip_preserves_the_run() {
        let file = std::env::temp_dir().join("deriva-checkpoint-test.msgpack");

        let cfg = test_config(RunMode::FixedHorizon, 0.2, 16);
        let mut engine = Engine::generate_initial_condition(cfg, 0).unwrap();
        for _ in 0..100 {
            engine.perform_step().unwrap();
        }

        engine.save_checkpoint(&file).unwrap();
        let mut resumed = Engine::load_checkpoint(&file).unwrap();
        std::fs::remove_file(&file).ok();

        assert_eq!(resumed.cfg(), engine.cfg());
        for _ in 0..100 {
            engine.perform_step().unwrap();
            resumed.perform_step().unwrap();
        }
        assert_eq!(
            engine.state().community.counts(),
            resumed.state().community.counts()
        );
    }

    #[test]
    fn fixation_run_fails_loudly_when_budget_is_too_small() {
        let mut cfg = test_config(RunMode::Fixation, 0.0, 64);
        cfg.run.step_budget = 8;
        let mut engine = Engine::generate_initial_condition(cfg, 0).unwrap();

        let file = std::env::temp_dir().join("deriva-budget-test.msgpack");
        let result = engine.perform_simulation(&file);
        std::fs::remove_file(&file).ok();

        // A 64-member community cannot fixate in 8 steps.
        assert!(result.is_err());
    }
}
