//! aegis-core: institutional risk analytics for Pell-serving colleges.
//!
//! Descriptive (normalize, score, aggregate), predictive (retention,
//! dropout, viability, elasticity) and prescriptive (budget allocation,
//! strategy comparison) layers over one ingested batch of institutions.

pub mod config;
pub mod engine;
pub mod error;
pub mod geography;
pub mod metrics;
pub mod normalizer;
pub mod optimizer;
pub mod predictor;
pub mod record;
pub mod risk;
pub mod rng;
pub mod snapshot;
pub mod strategy;
pub mod types;
