//! Score accumulation and kernel-smoothed reward estimation
//!
//! One axis of cells per bounded param. Evidence decays geometrically
//! between generations and neighbouring cells lend each other
//! statistical strength through an exponential distance kernel.

use rand::Rng;

use crate::param::{CandidateVector, Param, ParamError};

/// Fraction of accumulated evidence kept across a generation fold.
pub const RETENTION: f64 = 0.99;

/// Cumulative win/loss counts observed for one worker.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Score {
    pub wins: u32,
    pub losses: u32,
}

impl Score {
    pub fn new(wins: u32, losses: u32) -> Self {
        Score { wins, losses }
    }

    pub fn games(&self) -> u32 {
        self.wins + self.losses
    }

    /// Win rate over decided games; 0.0 when nothing has been played.
    pub fn rate(&self) -> f64 {
        if self.games() == 0 {
            0.0
        } else {
            f64::from(self.wins) / f64::from(self.games())
        }
    }

    pub fn add(&mut self, other: &Score) {
        self.wins += other.wins;
        self.losses += other.losses;
    }
}

/// Accumulated evidence for one value on one param's axis.
#[derive(Clone, Debug)]
pub struct ScoreCell {
    pub value: i32,
    pub win: f64,
    pub loss: f64,
}

/// Per-param score axes. Cells are generated once at construction and
/// never added or removed; only their weights change.
#[derive(Clone, Debug)]
pub struct ScoreGrid {
    axes: Vec<Vec<ScoreCell>>,
}

impl ScoreGrid {
    /// Build one axis per param from its `min..=max` by `step`.
    /// Fails on unbounded params.
    pub fn new(params: &[Param]) -> Result<Self, ParamError> {
        let mut axes = Vec::with_capacity(params.len());
        for param in params {
            let values = param
                .axis_values()
                .ok_or_else(|| ParamError::Unbounded(param.name.clone()))?;
            axes.push(
                values
                    .into_iter()
                    .map(|value| ScoreCell {
                        value,
                        win: 0.0,
                        loss: 0.0,
                    })
                    .collect(),
            );
        }
        Ok(ScoreGrid { axes })
    }

    pub fn num_params(&self) -> usize {
        self.axes.len()
    }

    pub fn axis(&self, index: usize) -> &[ScoreCell] {
        &self.axes[index]
    }

    /// Fade older evidence so the estimate tracks the moving population.
    pub fn decay(&mut self) {
        for axis in &mut self.axes {
            for cell in axis.iter_mut() {
                cell.win *= RETENTION;
                cell.loss *= RETENTION;
            }
        }
    }

    /// Add one worker's observed score to the matching cell on each axis.
    pub fn fold(&mut self, vector: &CandidateVector, score: &Score) {
        debug_assert_eq!(vector.len(), self.axes.len());
        for (axis, value) in self.axes.iter_mut().zip(vector.values()) {
            for cell in axis.iter_mut() {
                if cell.value == *value {
                    cell.win += f64::from(score.wins);
                    cell.loss += f64::from(score.losses);
                }
            }
        }
    }

    /// Compute the smoothed reward estimate for every cell.
    ///
    /// Each cell aggregates the whole axis with kernel weight
    /// `2^(-|j0-j1|)`. Cells with total weighted evidence below 1 get a
    /// fresh uniform sample in `[0,1)` instead: unknown, worth exploring.
    pub fn evaluate<R: Rng>(&self, rng: &mut R) -> RewardTable {
        let axes = self
            .axes
            .iter()
            .map(|axis| {
                (0..axis.len())
                    .map(|j0| {
                        let mut win = 0.0;
                        let mut loss = 0.0;
                        for (j1, cell) in axis.iter().enumerate() {
                            let weight = kernel_weight(j0, j1);
                            win += cell.win * weight;
                            loss += cell.loss * weight;
                        }
                        let total = win + loss;
                        let rate = if total >= 1.0 {
                            win / total
                        } else {
                            rng.gen::<f64>()
                        };
                        Reward {
                            value: axis[j0].value,
                            rate,
                        }
                    })
                    .collect()
            })
            .collect();
        RewardTable { axes }
    }
}

/// Kernel weight between two axis indices: `2^(-|j0-j1|)`.
fn kernel_weight(j0: usize, j1: usize) -> f64 {
    2f64.powi(-((j0 as i32) - (j1 as i32)).abs())
}

/// Smoothed reward estimate for one axis value.
#[derive(Clone, Copy, Debug)]
pub struct Reward {
    pub value: i32,
    pub rate: f64,
}

/// Reward estimates for every (param, value) pair, derived from one
/// grid state. Recomputed each generation, never stored.
#[derive(Clone, Debug)]
pub struct RewardTable {
    axes: Vec<Vec<Reward>>,
}

impl RewardTable {
    pub fn num_params(&self) -> usize {
        self.axes.len()
    }

    pub fn axis(&self, index: usize) -> &[Reward] {
        &self.axes[index]
    }

    /// The best value per param with its rate. Ties go to the first
    /// cell in axis order, so selection is deterministic for a fixed
    /// table.
    pub fn best_values(&self) -> (CandidateVector, Vec<f64>) {
        let mut values = Vec::with_capacity(self.axes.len());
        let mut rates = Vec::with_capacity(self.axes.len());
        for axis in &self.axes {
            let mut best = &axis[0];
            for reward in &axis[1..] {
                if reward.rate > best.rate {
                    best = reward;
                }
            }
            values.push(best.value);
            rates.push(best.rate);
        }
        (CandidateVector::new(values), rates)
    }

    /// Best value on one axis, skipping cells equal to `exclude`.
    /// Falls back to `exclude` when the axis holds no other value.
    pub fn best_excluding(&self, index: usize, exclude: i32) -> i32 {
        let mut best: Option<&Reward> = None;
        for reward in &self.axes[index] {
            if reward.value == exclude {
                continue;
            }
            if best.map_or(true, |b| reward.rate > b.rate) {
                best = Some(reward);
            }
        }
        best.map_or(exclude, |r| r.value)
    }
}
