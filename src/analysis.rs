use crate::config::Config;
use crate::model::Record;
use crate::stats::{Accumulator, TimeSeries};
use anyhow::{Context, Result};
use rmp_serde::decode;
use std::{
    collections::BTreeMap,
    fs::File,
    io::{BufRead, BufReader, BufWriter},
    path::Path,
};

pub trait Obs {
    fn update(&mut self, record: &Record) -> Result<()>;
    fn report(&self) -> serde_json::Value;
}

/// Richness over the whole run, summarized past the burn-in cutoff.
pub struct RichnessStats {
    time_series: TimeSeries,
    burn_in: usize,
}

impl RichnessStats {
    pub fn new(cfg: &Config) -> Self {
        Self {
            time_series: TimeSeries::new(),
            burn_in: cfg.run.burn_in,
        }
    }
}

impl Obs for RichnessStats {
    fn update(&mut self, record: &Record) -> Result<()> {
        for &richness in &record.richness {
            self.time_series.push(richness as f64);
        }
        Ok(())
    }

    fn report(&self) -> serde_json::Value {
        let report = self.time_series.report(self.burn_in);
        serde_json::json!({ "richness": report })
    }
}

/// Step count at which the community reached fixation, if it did.
pub struct FixationTime {
    step: Option<u64>,
}

impl FixationTime {
    pub fn new() -> Self {
        Self { step: None }
    }
}

impl Obs for FixationTime {
    fn update(&mut self, record: &Record) -> Result<()> {
        if record.absorbed && self.step.is_none() {
            self.step = Some(record.step);
        }
        Ok(())
    }

    fn report(&self) -> serde_json::Value {
        serde_json::json!({ "fixation_time": self.step })
    }
}

/// Final species-abundance summary of the local community.
pub struct FinalAbundance {
    counts: BTreeMap<String, u32>,
}

impl FinalAbundance {
    pub fn new() -> Self {
        Self {
            counts: BTreeMap::new(),
        }
    }
}

impl Obs for FinalAbundance {
    fn update(&mut self, record: &Record) -> Result<()> {
        self.counts = record
            .state
            .community
            .counts()
            .iter()
            .map(|(&id, &count)| (id.label(), count))
            .collect();
        Ok(())
    }

    fn report(&self) -> serde_json::Value {
        serde_json::json!({ "final_abundance": self.counts })
    }
}

/// Fraction of replacements recruited from the metacommunity, computed from
/// the recorded events. Only available when event recording is enabled.
pub struct MigrationFraction {
    acc: Accumulator,
    n_events: usize,
}

impl MigrationFraction {
    pub fn new() -> Self {
        Self {
            acc: Accumulator::new(),
            n_events: 0,
        }
    }
}

impl Obs for MigrationFraction {
    fn update(&mut self, record: &Record) -> Result<()> {
        for event in &record.events {
            self.acc.add(if event.immigrant { 1.0 } else { 0.0 });
            self.n_events += 1;
        }
        Ok(())
    }

    fn report(&self) -> serde_json::Value {
        if self.n_events == 0 {
            return serde_json::json!({ "migration_fraction": null });
        }
        serde_json::json!({ "migration_fraction": self.acc.report() })
    }
}

pub struct Analyzer {
    obs_ptr_vec: Vec<Box<dyn Obs>>,
    n_records: usize,
}

impl Analyzer {
    pub fn new(cfg: &Config) -> Self {
        let mut obs_ptr_vec: Vec<Box<dyn Obs>> = Vec::new();
        obs_ptr_vec.push(Box::new(RichnessStats::new(cfg)));
        obs_ptr_vec.push(Box::new(FixationTime::new()));
        obs_ptr_vec.push(Box::new(FinalAbundance::new()));
        obs_ptr_vec.push(Box::new(MigrationFraction::new()));
        Self {
            obs_ptr_vec,
            n_records: 0,
        }
    }

    pub fn add_file<P: AsRef<Path>>(&mut self, file: P) -> Result<()> {
        let file = file.as_ref();
        let file = File::open(file).with_context(|| format!("failed to open {:?}", file))?;
        let mut reader = BufReader::new(file);

        // Files cut short by fixation hold fewer records than configured,
        // so read frames until the file is exhausted.
        while !reader.fill_buf().context("failed to read record")?.is_empty() {
            let record: Record = decode::from_read(&mut reader).context("failed to read record")?;
            for obs in &mut self.obs_ptr_vec {
                obs.update(&record).context("failed to update observable")?;
            }
            self.n_records += 1;
        }
        Ok(())
    }

    pub fn save_results<P: AsRef<Path>>(&self, file: P) -> Result<()> {
        let file = file.as_ref();
        let file = File::create(file).with_context(|| format!("failed to create {:?}", file))?;
        let writer = BufWriter::new(file);

        log::info!("analyzed {} records", self.n_records);

        let reports: Vec<_> = self.obs_ptr_vec.iter().map(|obs| obs.report()).collect();
        serde_json::to_writer_pretty(writer, &reports)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Community, SpeciesId, State};

    fn record(step: u64, richness: Vec<u32>, absorbed: bool, members: Vec<u32>) -> Record {
        Record {
            step,
            richness,
            events: Vec::new(),
            absorbed,
            state: State {
                step,
                community: Community::new(members.into_iter().map(SpeciesId).collect()),
            },
        }
    }

    #[test]
    fn fixation_time_keeps_the_first_absorbed_step() {
        let mut obs = FixationTime::new();
        obs.update(&record(10, vec![3, 2], false, vec![0, 0, 1])).unwrap();
        assert_eq!(obs.report(), serde_json::json!({ "fixation_time": null }));

        obs.update(&record(20, vec![2, 1], true, vec![0, 0, 0])).unwrap();
        obs.update(&record(30, vec![1], true, vec![0, 0, 0])).unwrap();
        assert_eq!(obs.report(), serde_json::json!({ "fixation_time": 20 }));
    }

    #[test]
    fn migration_fraction_summarizes_recorded_events() {
        use crate::model::StepEvent;

        let mut obs = MigrationFraction::new();
        assert_eq!(
            obs.report(),
            serde_json::json!({ "migration_fraction": null })
        );

        let mut rec = record(4, vec![2, 2, 2, 2], false, vec![0, 0, 1]);
        rec.events = (0..4)
            .map(|step| StepEvent {
                step,
                position: 0,
                died: SpeciesId(0),
                recruited: SpeciesId(0),
                immigrant: step % 4 == 0,
            })
            .collect();
        obs.update(&rec).unwrap();

        let report = obs.report();
        let mean = report["migration_fraction"]["mean"].as_f64().unwrap();
        assert!((mean - 0.25).abs() < 1e-12);
    }

    #[test]
    fn final_abundance_reflects_the_last_record() {
        let mut obs = FinalAbundance::new();
        obs.update(&record(10, vec![2], false, vec![0, 1, 1])).unwrap();
        obs.update(&record(20, vec![2], false, vec![0, 0, 1])).unwrap();

        assert_eq!(
            obs.report(),
            serde_json::json!({ "final_abundance": { "AAA": 2, "AAB": 1 } })
        );
    }
}
