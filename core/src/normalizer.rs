//! Data normalizer — peer-group imputation and derived fields.
//!
//! Two-level lookup, computed once per batch:
//!   1. median of the field within the record's Carnegie peer group
//!   2. global median of the field across the whole batch
//!   3. otherwise the field stays null and the record is degraded for it
//!
//! Pure over its input batch. Rows without an identifier (or repeating one)
//! are skipped and counted; they never fail the batch.

use crate::{
    config::NormalizerConfig,
    error::AegisError,
    geography,
    record::{Field, InstitutionRecord, Metrics, NormalizedInstitution},
    types::{CarnegieCode, InstitutionId},
};
use serde::{Deserialize, Serialize};
use statrs::statistics::{Data, Median};
use std::collections::{BTreeMap, HashSet};

// ── Public types ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RejectedRow {
    pub row: usize,
    pub reason: String,
}

/// How each field was resolved across the batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FieldCoverage {
    pub field: Option<Field>,
    pub observed: usize,
    pub suppressed: usize,
    pub out_of_range: usize,
    pub imputed_from_peers: usize,
    pub imputed_from_global: usize,
    pub degraded: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NormalizationReport {
    pub rows_in: usize,
    pub accepted: usize,
    pub skipped_rows: usize,
    pub rejected: Vec<RejectedRow>,
    pub coverage: Vec<FieldCoverage>,
}

impl NormalizationReport {
    pub fn imputed_cells(&self) -> usize {
        self.coverage
            .iter()
            .map(|c| c.imputed_from_peers + c.imputed_from_global)
            .sum()
    }

    pub fn degraded_cells(&self) -> usize {
        self.coverage.iter().map(|c| c.degraded).sum()
    }

    pub fn coverage_for(&self, field: Field) -> Option<&FieldCoverage> {
        self.coverage.iter().find(|c| c.field == Some(field))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NormalizedBatch {
    pub institutions: Vec<NormalizedInstitution>,
    pub report: NormalizationReport,
}

/// Per-group and global medians for every imputable field.
#[derive(Debug, Clone, Default)]
pub struct PeerMedians {
    by_group: BTreeMap<CarnegieCode, BTreeMap<Field, f64>>,
    global: BTreeMap<Field, f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImputationSource {
    PeerGroup,
    Global,
}

impl PeerMedians {
    fn build(rows: &[(usize, &InstitutionRecord, Metrics<Option<f64>>)]) -> Self {
        let mut grouped: BTreeMap<CarnegieCode, BTreeMap<Field, Vec<f64>>> = BTreeMap::new();
        let mut global: BTreeMap<Field, Vec<f64>> = BTreeMap::new();

        for (_, record, cleaned) in rows {
            for field in Field::ALL {
                let Some(value) = *cleaned.get(field) else { continue };
                global.entry(field).or_default().push(value);
                if let Some(code) = record.carnegie {
                    grouped
                        .entry(code)
                        .or_default()
                        .entry(field)
                        .or_default()
                        .push(value);
                }
            }
        }

        Self {
            by_group: grouped
                .into_iter()
                .map(|(code, fields)| (code, median_map(fields)))
                .collect(),
            global: median_map(global),
        }
    }

    pub fn peer(&self, group: CarnegieCode, field: Field) -> Option<f64> {
        self.by_group.get(&group)?.get(&field).copied()
    }

    pub fn global(&self, field: Field) -> Option<f64> {
        self.global.get(&field).copied()
    }

    /// Peer median first, then the global median.
    pub fn lookup(&self, group: Option<CarnegieCode>, field: Field) -> Option<(f64, ImputationSource)> {
        group
            .and_then(|g| self.peer(g, field))
            .map(|v| (v, ImputationSource::PeerGroup))
            .or_else(|| self.global(field).map(|v| (v, ImputationSource::Global)))
    }
}

fn median_map(values: BTreeMap<Field, Vec<f64>>) -> BTreeMap<Field, f64> {
    values
        .into_iter()
        .filter(|(_, v)| !v.is_empty())
        .map(|(field, v)| (field, Data::new(v).median()))
        .collect()
}

// ── Normalization ────────────────────────────────────────────────────────────

pub fn normalize(records: &[InstitutionRecord], config: &NormalizerConfig) -> NormalizedBatch {
    let mut report = NormalizationReport {
        rows_in: records.len(),
        ..Default::default()
    };
    let mut coverage: BTreeMap<Field, FieldCoverage> = Field::ALL
        .iter()
        .map(|f| {
            (
                *f,
                FieldCoverage {
                    field: Some(*f),
                    ..Default::default()
                },
            )
        })
        .collect();

    // Pass 1: reject unusable rows and clean each cell against its domain.
    let mut seen: HashSet<InstitutionId> = HashSet::new();
    let mut rows: Vec<(usize, &InstitutionRecord, Metrics<Option<f64>>)> = Vec::with_capacity(records.len());

    for (row, record) in records.iter().enumerate() {
        let reason = match record.id {
            None => Some("missing identifier".to_string()),
            Some(id) if !seen.insert(id) => Some(format!("duplicate identifier {id}")),
            Some(_) => None,
        };
        if let Some(reason) = reason {
            log::warn!("{}", AegisError::MalformedRecord { row, reason: reason.clone() });
            report.rejected.push(RejectedRow { row, reason });
            continue;
        }

        let mut cleaned = Metrics::<Option<f64>>::default();
        for field in Field::ALL {
            let cell = *record.metrics.get(field);
            let stats = coverage.entry(field).or_default();
            if cell.is_suppressed() {
                stats.suppressed += 1;
            }
            match cell.value() {
                Some(v) if field.accepts(v) => {
                    stats.observed += 1;
                    *cleaned.get_mut(field) = Some(v);
                }
                Some(v) => {
                    stats.out_of_range += 1;
                    log::warn!(
                        "normalize: row={row} {}={v} outside its domain, treated as missing",
                        field.name()
                    );
                }
                None => {}
            }
        }
        rows.push((row, record, cleaned));
    }

    // Pass 2: medians over the cleaned batch.
    let medians = PeerMedians::build(&rows);

    // Pass 3: impute and derive.
    let mut institutions = Vec::with_capacity(rows.len());
    for (_, record, mut metrics) in rows {
        let mut imputed = Vec::new();
        let mut degraded = Vec::new();

        for field in Field::ALL {
            if metrics.get(field).is_some() {
                continue;
            }
            let stats = coverage.entry(field).or_default();
            match medians.lookup(record.carnegie, field) {
                Some((value, source)) => {
                    *metrics.get_mut(field) = Some(value);
                    imputed.push(field);
                    match source {
                        ImputationSource::PeerGroup => stats.imputed_from_peers += 1,
                        ImputationSource::Global => stats.imputed_from_global += 1,
                    }
                }
                None => {
                    degraded.push(field);
                    stats.degraded += 1;
                }
            }
        }

        let id = match record.id {
            Some(id) => id,
            None => continue,
        };
        institutions.push(derive(record, id, metrics, imputed, degraded, config));
    }

    report.accepted = institutions.len();
    report.skipped_rows = report.rejected.len();
    report.coverage = coverage.into_values().collect();

    log::info!(
        "normalize: rows={} accepted={} skipped={} imputed_cells={} degraded_cells={}",
        report.rows_in,
        report.accepted,
        report.skipped_rows,
        report.imputed_cells(),
        report.degraded_cells(),
    );

    NormalizedBatch { institutions, report }
}

fn derive(
    record: &InstitutionRecord,
    id: InstitutionId,
    metrics: Metrics<Option<f64>>,
    imputed: Vec<Field>,
    degraded: Vec<Field>,
    config: &NormalizerConfig,
) -> NormalizedInstitution {
    let value_add_ratio = match (metrics.median_earnings, metrics.median_debt) {
        (Some(earnings), Some(debt)) => Some(earnings / debt.max(config.value_add_epsilon)),
        _ => None,
    };
    let unmet_need_gap = match (
        metrics.cost_of_attendance,
        metrics.expected_family_contribution,
        metrics.grant_aid,
    ) {
        (Some(coa), Some(efc), Some(grant)) => Some(coa - efc - grant),
        _ => None,
    };
    let geographic_isolation_miles = match (config.compute_isolation, record.latitude, record.longitude) {
        (true, Some(lat), Some(lon)) => geography::nearest_metro_miles(lat, lon),
        _ => None,
    };
    let adjusted_earnings = metrics
        .median_earnings
        .and_then(|e| geography::adjust_earnings(e, &record.state));

    NormalizedInstitution {
        id,
        name: record.name.clone(),
        city: record.city.clone(),
        state: record.state.trim().to_ascii_uppercase(),
        carnegie: record.carnegie,
        ownership: record.ownership,
        latitude: record.latitude,
        longitude: record.longitude,
        metrics,
        imputed,
        degraded,
        value_add_ratio,
        unmet_need_gap,
        geographic_isolation_miles,
        adjusted_earnings,
    }
}

/// Medians for a batch without normalizing it; useful for inspecting peer groups.
pub fn peer_medians(records: &[InstitutionRecord]) -> PeerMedians {
    let rows: Vec<_> = records
        .iter()
        .enumerate()
        .filter(|(_, r)| r.id.is_some())
        .map(|(i, r)| {
            let mut cleaned = Metrics::<Option<f64>>::default();
            for field in Field::ALL {
                *cleaned.get_mut(field) = r.metrics.get(field).value().filter(|v| field.accepts(*v));
            }
            (i, r, cleaned)
        })
        .collect();
    PeerMedians::build(&rows)
}
