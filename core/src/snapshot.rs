//! Dataset snapshot — one normalized, scored ingestion batch.
//!
//! A snapshot is built once per batch and never mutated. A refresh builds a
//! new snapshot and swaps the engine's `Arc`; readers holding the previous
//! `Arc` keep a consistent view until they drop it.

use crate::{
    normalizer::NormalizationReport,
    record::NormalizedInstitution,
    risk::RiskScore,
    types::{BatchId, InstitutionId},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "StoredSnapshot")]
pub struct DatasetSnapshot {
    pub batch_id:     BatchId,
    pub ingested_at:  DateTime<Utc>,
    pub institutions: Vec<NormalizedInstitution>,
    pub scores:       HashMap<InstitutionId, RiskScore>,
    /// Institutions with no usable risk indicator.
    pub unscored:     Vec<InstitutionId>,
    pub report:       NormalizationReport,
    #[serde(skip)]
    positions:        HashMap<InstitutionId, usize>,
}

/// Serialized form; the id index is rebuilt on load.
#[derive(Deserialize)]
struct StoredSnapshot {
    batch_id:     BatchId,
    ingested_at:  DateTime<Utc>,
    institutions: Vec<NormalizedInstitution>,
    scores:       HashMap<InstitutionId, RiskScore>,
    unscored:     Vec<InstitutionId>,
    report:       NormalizationReport,
}

impl From<StoredSnapshot> for DatasetSnapshot {
    fn from(stored: StoredSnapshot) -> Self {
        Self {
            positions: index_by_id(&stored.institutions),
            batch_id: stored.batch_id,
            ingested_at: stored.ingested_at,
            institutions: stored.institutions,
            scores: stored.scores,
            unscored: stored.unscored,
            report: stored.report,
        }
    }
}

fn index_by_id(institutions: &[NormalizedInstitution]) -> HashMap<InstitutionId, usize> {
    institutions.iter().enumerate().map(|(i, inst)| (inst.id, i)).collect()
}

impl DatasetSnapshot {
    pub fn new(
        batch_id: BatchId,
        institutions: Vec<NormalizedInstitution>,
        scores: HashMap<InstitutionId, RiskScore>,
        unscored: Vec<InstitutionId>,
        report: NormalizationReport,
    ) -> Self {
        let positions = index_by_id(&institutions);
        Self {
            batch_id,
            ingested_at: Utc::now(),
            institutions,
            scores,
            unscored,
            report,
            positions,
        }
    }

    pub fn institution(&self, id: InstitutionId) -> Option<&NormalizedInstitution> {
        self.positions.get(&id).and_then(|&i| self.institutions.get(i))
    }

    pub fn score(&self, id: InstitutionId) -> Option<&RiskScore> {
        self.scores.get(&id)
    }

    pub fn risk_index_map(&self) -> HashMap<InstitutionId, u8> {
        self.scores.iter().map(|(id, s)| (*id, s.index)).collect()
    }

    pub fn len(&self) -> usize {
        self.institutions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.institutions.is_empty()
    }
}
