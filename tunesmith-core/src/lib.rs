//! Tunesmith core - parameter axes, score smoothing and candidate policies
//!
//! This crate holds the pure data and logic layer of the tuner:
//! - Parameter definitions and candidate vectors
//! - The per-parameter score grid with decay and kernel smoothing
//! - Candidate generation (evolutionary population, coordinate-ascent probes)
//! - Run configuration loaded from JSON

pub mod config;
pub mod generate;
pub mod grid;
pub mod param;

pub use config::{ClientConfig, ConfigError, EngineConfig, RunConfig, ServerConfig};
pub use generate::{
    mix_random_value, mix_second_value, next_population, probe_outcome, probe_values, ProbeOutcome,
};
pub use grid::{Reward, RewardTable, Score, ScoreCell, ScoreGrid};
pub use param::{normal_vector, random_vector, CandidateVector, Param, ParamError};
