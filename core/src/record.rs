//! Institution records as ingested and as normalized.
//!
//! Raw and normalized records share one metric layout, `Metrics<T>`:
//! raw rows carry `Reported` cells (value, suppressed or missing),
//! normalized rows carry `Option<f64>` after imputation.

use crate::types::{CarnegieCode, InstitutionId};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

// ── Reported cells ───────────────────────────────────────────────────────────

/// One numeric cell as the upstream source reported it.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Reported {
    Value(f64),
    /// Explicit privacy-suppression marker.
    Suppressed,
    #[default]
    Missing,
}

impl Reported {
    pub fn value(self) -> Option<f64> {
        match self {
            Self::Value(v) if v.is_finite() => Some(v),
            _ => None,
        }
    }

    pub fn is_suppressed(self) -> bool {
        matches!(self, Self::Suppressed)
    }
}

impl From<Option<f64>> for Reported {
    fn from(value: Option<f64>) -> Self {
        value.map_or(Self::Missing, Self::Value)
    }
}

impl From<f64> for Reported {
    fn from(value: f64) -> Self {
        Self::Value(value)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ReportedRepr {
    Number(f64),
    Text(String),
    Null(()),
}

impl<'de> Deserialize<'de> for Reported {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match ReportedRepr::deserialize(deserializer)? {
            ReportedRepr::Number(v) => Self::Value(v),
            ReportedRepr::Null(()) => Self::Missing,
            ReportedRepr::Text(s) => match s.trim() {
                "PrivacySuppressed" | "suppressed" => Self::Suppressed,
                "" | "NULL" | "null" | "NaN" => Self::Missing,
                other => other.parse::<f64>().map_or(Self::Missing, Self::Value),
            },
        })
    }
}

impl Serialize for Reported {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Value(v) => serializer.serialize_f64(*v),
            Self::Suppressed => serializer.serialize_str("PrivacySuppressed"),
            Self::Missing => serializer.serialize_none(),
        }
    }
}

// ── Metric layout ────────────────────────────────────────────────────────────

/// Every numeric field subject to peer-group imputation.
/// Order is stable; it is the iteration order of `Field::ALL`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    EnrollmentSize,
    AdmissionRate,
    RetentionRate,
    CompletionRate,
    CompletionRatePell,
    CompletionRateNonPell,
    MedianEarnings,
    MedianDebt,
    PellShare,
    InstructionalSpend,
    SatAverage,
    NetPriceLowIncome,
    CostOfAttendance,
    ExpectedFamilyContribution,
    GrantAid,
    RepaymentRate,
}

impl Field {
    pub const ALL: [Field; 16] = [
        Field::EnrollmentSize,
        Field::AdmissionRate,
        Field::RetentionRate,
        Field::CompletionRate,
        Field::CompletionRatePell,
        Field::CompletionRateNonPell,
        Field::MedianEarnings,
        Field::MedianDebt,
        Field::PellShare,
        Field::InstructionalSpend,
        Field::SatAverage,
        Field::NetPriceLowIncome,
        Field::CostOfAttendance,
        Field::ExpectedFamilyContribution,
        Field::GrantAid,
        Field::RepaymentRate,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::EnrollmentSize => "enrollment_size",
            Self::AdmissionRate => "admission_rate",
            Self::RetentionRate => "retention_rate",
            Self::CompletionRate => "completion_rate",
            Self::CompletionRatePell => "completion_rate_pell",
            Self::CompletionRateNonPell => "completion_rate_non_pell",
            Self::MedianEarnings => "median_earnings",
            Self::MedianDebt => "median_debt",
            Self::PellShare => "pell_share",
            Self::InstructionalSpend => "instructional_spend",
            Self::SatAverage => "sat_average",
            Self::NetPriceLowIncome => "net_price_low_income",
            Self::CostOfAttendance => "cost_of_attendance",
            Self::ExpectedFamilyContribution => "expected_family_contribution",
            Self::GrantAid => "grant_aid",
            Self::RepaymentRate => "repayment_rate",
        }
    }

    /// Fields constrained to [0, 1].
    pub fn is_rate(&self) -> bool {
        matches!(
            self,
            Self::AdmissionRate
                | Self::RetentionRate
                | Self::CompletionRate
                | Self::CompletionRatePell
                | Self::CompletionRateNonPell
                | Self::PellShare
                | Self::RepaymentRate
        )
    }

    /// Accepts a raw observation only if it satisfies the field's domain.
    pub fn accepts(&self, value: f64) -> bool {
        if !value.is_finite() {
            return false;
        }
        if self.is_rate() {
            (0.0..=1.0).contains(&value)
        } else {
            value >= 0.0
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Metrics<T> {
    pub enrollment_size: T,
    pub admission_rate: T,
    pub retention_rate: T,
    pub completion_rate: T,
    pub completion_rate_pell: T,
    pub completion_rate_non_pell: T,
    pub median_earnings: T,
    pub median_debt: T,
    pub pell_share: T,
    pub instructional_spend: T,
    pub sat_average: T,
    pub net_price_low_income: T,
    pub cost_of_attendance: T,
    pub expected_family_contribution: T,
    pub grant_aid: T,
    pub repayment_rate: T,
}

impl<T> Metrics<T> {
    pub fn get(&self, field: Field) -> &T {
        match field {
            Field::EnrollmentSize => &self.enrollment_size,
            Field::AdmissionRate => &self.admission_rate,
            Field::RetentionRate => &self.retention_rate,
            Field::CompletionRate => &self.completion_rate,
            Field::CompletionRatePell => &self.completion_rate_pell,
            Field::CompletionRateNonPell => &self.completion_rate_non_pell,
            Field::MedianEarnings => &self.median_earnings,
            Field::MedianDebt => &self.median_debt,
            Field::PellShare => &self.pell_share,
            Field::InstructionalSpend => &self.instructional_spend,
            Field::SatAverage => &self.sat_average,
            Field::NetPriceLowIncome => &self.net_price_low_income,
            Field::CostOfAttendance => &self.cost_of_attendance,
            Field::ExpectedFamilyContribution => &self.expected_family_contribution,
            Field::GrantAid => &self.grant_aid,
            Field::RepaymentRate => &self.repayment_rate,
        }
    }

    pub fn get_mut(&mut self, field: Field) -> &mut T {
        match field {
            Field::EnrollmentSize => &mut self.enrollment_size,
            Field::AdmissionRate => &mut self.admission_rate,
            Field::RetentionRate => &mut self.retention_rate,
            Field::CompletionRate => &mut self.completion_rate,
            Field::CompletionRatePell => &mut self.completion_rate_pell,
            Field::CompletionRateNonPell => &mut self.completion_rate_non_pell,
            Field::MedianEarnings => &mut self.median_earnings,
            Field::MedianDebt => &mut self.median_debt,
            Field::PellShare => &mut self.pell_share,
            Field::InstructionalSpend => &mut self.instructional_spend,
            Field::SatAverage => &mut self.sat_average,
            Field::NetPriceLowIncome => &mut self.net_price_low_income,
            Field::CostOfAttendance => &mut self.cost_of_attendance,
            Field::ExpectedFamilyContribution => &mut self.expected_family_contribution,
            Field::GrantAid => &mut self.grant_aid,
            Field::RepaymentRate => &mut self.repayment_rate,
        }
    }
}

// ── Records ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Ownership {
    Public,
    PrivateNonprofit,
    PrivateForProfit,
}

impl Ownership {
    /// Scorecard ownership code: 1 public, 2 private nonprofit, 3 for-profit.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::Public),
            2 => Some(Self::PrivateNonprofit),
            3 => Some(Self::PrivateForProfit),
            _ => None,
        }
    }
}

/// One row per institution, as delivered by the ingestion collaborator.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct InstitutionRecord {
    /// A row without an identifier is rejected by the normalizer.
    #[serde(default)]
    pub id: Option<InstitutionId>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub carnegie: Option<CarnegieCode>,
    #[serde(default)]
    pub ownership: Option<Ownership>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(flatten)]
    pub metrics: Metrics<Reported>,
}

/// InstitutionRecord after imputation, plus derived fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedInstitution {
    pub id: InstitutionId,
    pub name: String,
    pub city: String,
    pub state: String,
    pub carnegie: Option<CarnegieCode>,
    pub ownership: Option<Ownership>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub metrics: Metrics<Option<f64>>,
    /// Fields filled from a peer-group or global median.
    pub imputed: Vec<Field>,
    /// Fields still null after both imputation levels.
    pub degraded: Vec<Field>,
    pub value_add_ratio: Option<f64>,
    pub unmet_need_gap: Option<f64>,
    pub geographic_isolation_miles: Option<f64>,
    pub adjusted_earnings: Option<f64>,
}

impl NormalizedInstitution {
    pub fn metric(&self, field: Field) -> Option<f64> {
        *self.metrics.get(field)
    }

    pub fn enrollment(&self) -> f64 {
        self.metrics.enrollment_size.unwrap_or(0.0)
    }

    /// Students receiving Pell grants, rounded down.
    pub fn pell_students(&self) -> Option<f64> {
        Some((self.metrics.enrollment_size? * self.metrics.pell_share?).floor())
    }

    /// Pell minus non-Pell completion rate; negative means Pell students lag.
    pub fn completion_gap(&self) -> Option<f64> {
        Some(self.metrics.completion_rate_pell? - self.metrics.completion_rate_non_pell?)
    }

    /// Back to the ingestion shape, with every present value reported.
    pub fn to_record(&self) -> InstitutionRecord {
        let mut metrics = Metrics::<Reported>::default();
        for field in Field::ALL {
            *metrics.get_mut(field) = Reported::from(self.metric(field));
        }
        InstitutionRecord {
            id: Some(self.id),
            name: self.name.clone(),
            city: self.city.clone(),
            state: self.state.clone(),
            carnegie: self.carnegie,
            ownership: self.ownership,
            latitude: self.latitude,
            longitude: self.longitude,
            metrics,
        }
    }
}
