//! Shared primitive types used across the entire analytics core.

/// Stable institution identifier (College Scorecard unit id).
pub type InstitutionId = u64;

/// Identifier of one ingestion batch. A fresh batch replaces the whole set.
pub type BatchId = String;

/// Carnegie basic classification code, the peer-group key for imputation.
pub type CarnegieCode = i32;

/// Floor used wherever a ratio would otherwise divide by zero.
pub const EPSILON: f64 = 1e-9;
