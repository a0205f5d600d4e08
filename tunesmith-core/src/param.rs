//! Tunable parameters and candidate vectors

use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Errors from parameter validation
#[derive(Debug, thiserror::Error)]
pub enum ParamError {
    #[error("param {0}: step must be positive")]
    NonPositiveStep(String),
    #[error("param {0}: min and max must be given together")]
    HalfBounded(String),
    #[error("param {0}: bounds must satisfy min <= normal <= max")]
    NormalOutOfRange(String),
    #[error("param {0}: (max - min) must be a multiple of step")]
    MisalignedBounds(String),
    #[error("duplicate param name {0}")]
    DuplicateName(String),
    #[error("param {0} has no bounds; this operation requires min and max")]
    Unbounded(String),
}

/// One tunable integer knob of the engine.
///
/// Bounds are optional: coordinate-ascent probing works on unbounded
/// params, while the evolutionary search needs the full `min..=max`
/// axis. Immutable once a run starts.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Param {
    /// Name, unique within a run; also the override symbol injected
    /// into the engine build
    pub name: String,
    /// Default value, used for baseline workers
    pub normal: i32,
    /// Lower bound of the search axis (inclusive)
    #[serde(default)]
    pub min: Option<i32>,
    /// Upper bound of the search axis (inclusive)
    #[serde(default)]
    pub max: Option<i32>,
    /// Axis granularity
    pub step: i32,
}

impl Param {
    /// Check the per-param invariants.
    pub fn validate(&self) -> Result<(), ParamError> {
        if self.step <= 0 {
            return Err(ParamError::NonPositiveStep(self.name.clone()));
        }
        match (self.min, self.max) {
            (None, None) => Ok(()),
            (Some(min), Some(max)) => {
                if !(min <= self.normal && self.normal <= max) {
                    Err(ParamError::NormalOutOfRange(self.name.clone()))
                } else if (max - min) % self.step != 0 {
                    Err(ParamError::MisalignedBounds(self.name.clone()))
                } else {
                    Ok(())
                }
            }
            _ => Err(ParamError::HalfBounded(self.name.clone())),
        }
    }

    /// Bounds as a pair, if the param is bounded.
    pub fn bounds(&self) -> Option<(i32, i32)> {
        self.min.zip(self.max)
    }

    /// All values on the search axis, from min to max by step.
    /// `None` for unbounded params.
    pub fn axis_values(&self) -> Option<Vec<i32>> {
        let (min, max) = self.bounds()?;
        Some((min..=max).step_by(self.step as usize).collect())
    }
}

/// Validate a parameter set: per-param invariants plus name uniqueness.
pub fn validate_params(params: &[Param]) -> Result<(), ParamError> {
    for (i, param) in params.iter().enumerate() {
        param.validate()?;
        if params[..i].iter().any(|p| p.name == param.name) {
            return Err(ParamError::DuplicateName(param.name.clone()));
        }
    }
    Ok(())
}

/// One full assignment of values to all params, in declaration order.
///
/// Owned by exactly one worker for its lifetime; a "mix" that changes
/// one coordinate produces a new vector.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CandidateVector(Vec<i32>);

impl CandidateVector {
    pub fn new(values: Vec<i32>) -> Self {
        CandidateVector(values)
    }

    pub fn values(&self) -> &[i32] {
        &self.0
    }

    pub fn get(&self, index: usize) -> i32 {
        self.0[index]
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// New vector with one coordinate replaced.
    pub fn with_value(&self, index: usize, value: i32) -> CandidateVector {
        let mut values = self.0.clone();
        values[index] = value;
        CandidateVector(values)
    }
}

impl fmt::Display for CandidateVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|v| v.to_string()).collect();
        write!(f, "[{}]", parts.join(","))
    }
}

/// Vector holding every param's normal value.
pub fn normal_vector(params: &[Param]) -> CandidateVector {
    CandidateVector(params.iter().map(|p| p.normal).collect())
}

/// Vector with a uniformly random axis value per param.
/// Unbounded params fall back to their normal value.
pub fn random_vector<R: Rng>(params: &[Param], rng: &mut R) -> CandidateVector {
    let values = params
        .iter()
        .map(|p| match p.axis_values() {
            Some(axis) => axis[rng.gen_range(0..axis.len())],
            None => p.normal,
        })
        .collect();
    CandidateVector(values)
}
