//! Metacommunity construction and sampling.

use crate::logseries;
use crate::model::{Community, SpeciesId};
use anyhow::{Context, Result, bail};
use rand::Rng;
use rand_distr::{Distribution, weighted::WeightedIndex};
use serde::{Deserialize, Serialize};

/// Expected species richness of a log-series community,
/// `S = -alpha * ln(alpha / (size + alpha))`.
pub fn expected_richness(alpha: f64, size: u64) -> f64 {
    -alpha * (alpha / (size as f64 + alpha)).ln()
}

/// Immutable species-abundance table of the source community.
///
/// Built once per run and only read afterwards. Species are identified by
/// their index into the table.
#[derive(Clone, Serialize, Deserialize)]
pub struct Metacommunity {
    abundances: Vec<u64>,
    total: u64,
}

impl Metacommunity {
    /// Sample a metacommunity of nominal `size` individuals with Fisher's
    /// alpha `alpha`.
    ///
    /// The species count is the truncated closed-form expectation; the
    /// realized total is the sum of the sampled abundances, which need not
    /// hit `size` exactly.
    pub fn build<R: Rng + ?Sized>(alpha: f64, size: u64, rng: &mut R) -> Result<Self> {
        if !(alpha > 0.0) {
            bail!("Fisher's alpha must be positive, but is {alpha}");
        }
        if size == 0 {
            bail!("metacommunity size must be positive");
        }

        let n_species = expected_richness(alpha, size).trunc() as usize;
        if n_species == 0 {
            bail!("alpha {alpha} and size {size} yield an expected richness below one species");
        }

        let mut report = |assigned: usize, total: usize| {
            if assigned % 1000 == 0 || assigned == total {
                let progress = 100.0 * assigned as f64 / total as f64;
                log::debug!("sampled {progress:06.2}% of species abundances");
            }
        };
        let abundances = logseries::draw(n_species, size as f64, alpha, rng, Some(&mut report))
            .context("failed to sample species abundances")?;

        let total = abundances.iter().sum();

        Ok(Self { abundances, total })
    }

    pub fn species_count(&self) -> usize {
        self.abundances.len()
    }

    /// Realized number of individuals across all species.
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Draw one species with probability proportional to its abundance.
    pub fn recruit<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<SpeciesId> {
        let dist = WeightedIndex::new(&self.abundances)?;
        Ok(SpeciesId(dist.sample(rng) as u32))
    }

    /// Draw a local community of `n` individuals, each species with
    /// probability proportional to its metacommunity abundance.
    pub fn sample_community<R: Rng + ?Sized>(&self, n: usize, rng: &mut R) -> Result<Community> {
        if n == 0 {
            bail!("local community size must be positive");
        }

        let dist = WeightedIndex::new(&self.abundances)?;
        let members = (0..n)
            .map(|_| SpeciesId(dist.sample(rng) as u32))
            .collect();

        Ok(Community::new(members))
    }
}
