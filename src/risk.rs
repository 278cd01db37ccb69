use serde::{Deserialize, Serialize};

use crate::models::AcademicIndicators;

const NOTE_KEYWORDS: [&str; 5] = ["fail", "risk", "struggl", "drop", "absent"];

/// Neutral contribution used when an inferred score lacks an indicator.
const NEUTRAL_COMPONENT: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskTier {
    High,
    Medium,
    Low,
    Unknown,
}

impl RiskTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskTier::High => "high",
            RiskTier::Medium => "medium",
            RiskTier::Low => "low",
            RiskTier::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for RiskTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RiskTier {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "high" => Ok(RiskTier::High),
            "medium" => Ok(RiskTier::Medium),
            "low" => Ok(RiskTier::Low),
            "unknown" => Ok(RiskTier::Unknown),
            other => Err(format!("unknown risk tier '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskWeights {
    pub attendance: f64,
    pub gpa: f64,
    pub assignments: f64,
    pub notes: f64,
}

impl Default for RiskWeights {
    fn default() -> Self {
        Self {
            attendance: 0.35,
            gpa: 0.35,
            assignments: 0.2,
            notes: 0.1,
        }
    }
}

impl RiskWeights {
    pub fn total(&self) -> f64 {
        self.attendance + self.gpa + self.assignments + self.notes
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskThresholds {
    pub high: f64,
    pub medium: f64,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self {
            high: 0.65,
            medium: 0.4,
        }
    }
}

impl RiskThresholds {
    /// Scores sitting exactly on a threshold land in the higher tier.
    pub fn classify(&self, score: Option<f64>) -> RiskTier {
        match score {
            None => RiskTier::Unknown,
            Some(value) if value.is_nan() => RiskTier::Unknown,
            Some(value) if value >= self.high => RiskTier::High,
            Some(value) if value >= self.medium => RiskTier::Medium,
            Some(_) => RiskTier::Low,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub score: f64,
    pub tier: RiskTier,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiskModel {
    pub weights: RiskWeights,
    pub thresholds: RiskThresholds,
    pub cgpa_scale: f64,
}

impl Default for RiskModel {
    fn default() -> Self {
        Self {
            weights: RiskWeights::default(),
            thresholds: RiskThresholds::default(),
            cgpa_scale: 10.0,
        }
    }
}

impl RiskModel {
    pub fn with_cgpa_scale(mut self, cgpa_scale: f64) -> Self {
        self.cgpa_scale = cgpa_scale;
        self
    }

    /// Weighted score over fully known indicators. The note contributes the
    /// notes weight as a flat penalty.
    pub fn assess(
        &self,
        attendance_percent: f64,
        cgpa: f64,
        assignments_completed: u32,
        assignments_total: u32,
        note: &str,
    ) -> RiskAssessment {
        let raw = self.weights.attendance * self.attendance_component(attendance_percent)
            + self.weights.gpa * self.cgpa_component(cgpa)
            + self.weights.assignments
                * assignment_component(assignments_completed, assignments_total)
            + self.note_penalty(note);

        let score = clamp_unit(raw);
        RiskAssessment {
            score,
            tier: self.thresholds.classify(Some(score)),
        }
    }

    /// Score for partially known indicators, as used when previewing or
    /// committing an import. Missing components count as neutral and the
    /// weighted sum is normalised by the total weight.
    pub fn infer(&self, indicators: &AcademicIndicators) -> f64 {
        let attendance = indicators
            .attendance_percent
            .map(|value| self.attendance_component(value))
            .unwrap_or(NEUTRAL_COMPONENT);
        let gpa = indicators
            .cgpa
            .map(|value| self.cgpa_component(value))
            .unwrap_or(NEUTRAL_COMPONENT);
        let assignments = match (indicators.assignments_completed, indicators.assignments_total) {
            (Some(completed), Some(total)) if total > 0 => assignment_component(completed, total),
            _ => NEUTRAL_COMPONENT,
        };
        let note = match indicators.mentor_note.as_deref() {
            Some(text) if note_matches(text) => 1.0,
            _ => 0.0,
        };

        let weighted = attendance * self.weights.attendance
            + gpa * self.weights.gpa
            + assignments * self.weights.assignments
            + note * self.weights.notes;
        let total = self.weights.total();
        let total = if total > 0.0 { total } else { 1.0 };
        clamp_unit(weighted / total)
    }

    pub fn note_penalty(&self, note: &str) -> f64 {
        if note_matches(note) {
            self.weights.notes
        } else {
            0.0
        }
    }

    fn attendance_component(&self, attendance_percent: f64) -> f64 {
        1.0 - clamp(attendance_percent, 0.0, 100.0) / 100.0
    }

    fn cgpa_component(&self, cgpa: f64) -> f64 {
        let scale = if self.cgpa_scale > 0.0 { self.cgpa_scale } else { 10.0 };
        1.0 - clamp(cgpa, 0.0, scale) / scale
    }
}

/// Risk for fully known indicators under the default model.
pub fn compute_risk(
    attendance_percent: f64,
    cgpa: f64,
    assignments_completed: u32,
    assignments_total: u32,
    note: &str,
) -> RiskAssessment {
    RiskModel::default().assess(
        attendance_percent,
        cgpa,
        assignments_completed,
        assignments_total,
        note,
    )
}

pub fn classify_tier(score: Option<f64>) -> RiskTier {
    RiskThresholds::default().classify(score)
}

pub fn note_matches(note: &str) -> bool {
    let lowered = note.to_lowercase();
    NOTE_KEYWORDS.iter().any(|keyword| lowered.contains(keyword))
}

fn assignment_component(completed: u32, total: u32) -> f64 {
    if total == 0 {
        return 1.0;
    }
    1.0 - completed as f64 / total.max(1) as f64
}

fn clamp(value: f64, min: f64, max: f64) -> f64 {
    if value.is_nan() {
        min
    } else {
        value.max(min).min(max)
    }
}

fn clamp_unit(value: f64) -> f64 {
    clamp(value, 0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_boundaries_resolve_upward() {
        assert_eq!(classify_tier(None), RiskTier::Unknown);
        assert_eq!(classify_tier(Some(0.0)), RiskTier::Low);
        assert_eq!(classify_tier(Some(0.39)), RiskTier::Low);
        assert_eq!(classify_tier(Some(0.4)), RiskTier::Medium);
        assert_eq!(classify_tier(Some(0.64)), RiskTier::Medium);
        assert_eq!(classify_tier(Some(0.65)), RiskTier::High);
        assert_eq!(classify_tier(Some(1.0)), RiskTier::High);
    }

    #[test]
    fn custom_thresholds_override_defaults() {
        let thresholds = RiskThresholds {
            high: 0.7,
            medium: 0.4,
        };
        assert_eq!(thresholds.classify(Some(0.68)), RiskTier::Medium);
        assert_eq!(thresholds.classify(Some(0.7)), RiskTier::High);
    }

    #[test]
    fn perfect_student_scores_zero() {
        let risk = compute_risk(100.0, 10.0, 10, 10, "");
        assert!(risk.score.abs() < 1e-9);
        assert_eq!(risk.tier, RiskTier::Low);
    }

    #[test]
    fn formula_matches_weighted_components() {
        let risk = compute_risk(80.0, 6.0, 3, 4, "steady progress");
        let expected = 0.35 * 0.2 + 0.35 * 0.4 + 0.2 * 0.25;
        assert!((risk.score - expected).abs() < 1e-9);
        assert_eq!(risk.tier, RiskTier::Low);
    }

    #[test]
    fn failing_note_adds_exact_penalty() {
        let base = compute_risk(70.0, 6.5, 5, 10, "");
        let flagged = compute_risk(70.0, 6.5, 5, 10, "Currently FAILING two modules");
        assert!((flagged.score - base.score - 0.1).abs() < 1e-9);
    }

    #[test]
    fn keywords_match_case_insensitively_as_substrings() {
        assert!(note_matches("Struggling with labs"));
        assert!(note_matches("frequently ABSENT"));
        assert!(note_matches("considering a dropout"));
        assert!(!note_matches("doing well"));
    }

    #[test]
    fn score_stays_in_unit_interval() {
        for attendance in [0.0, 25.0, 50.0, 100.0, -20.0, 180.0] {
            for cgpa in [0.0, 4.0, 10.0, -1.0, 14.0] {
                for (completed, total) in [(0, 0), (0, 10), (10, 10), (25, 10)] {
                    let risk = compute_risk(attendance, cgpa, completed, total, "failing and absent");
                    assert!((0.0..=1.0).contains(&risk.score), "score {} out of range", risk.score);
                }
            }
        }
    }

    #[test]
    fn worst_case_clamps_to_one() {
        let risk = compute_risk(0.0, 0.0, 0, 12, "at risk of failing");
        assert!((risk.score - 1.0).abs() < 1e-9);
        assert_eq!(risk.tier, RiskTier::High);
    }

    #[test]
    fn over_completion_offsets_other_components() {
        let risk = compute_risk(100.0, 10.0, 25, 10, "failing");
        assert!(risk.score.abs() < 1e-9);
        assert_eq!(risk.tier, RiskTier::Low);
    }

    #[test]
    fn cgpa_scale_of_five_rescales_gpa_component() {
        let model = RiskModel::default().with_cgpa_scale(5.0);
        let risk = model.assess(100.0, 2.5, 4, 4, "");
        assert!((risk.score - 0.35 * 0.5).abs() < 1e-9);
    }

    #[test]
    fn inferred_score_treats_missing_indicators_as_neutral() {
        let model = RiskModel::default();
        let empty = AcademicIndicators::default();
        assert!((model.infer(&empty) - 0.45).abs() < 1e-9);

        let known = AcademicIndicators {
            attendance_percent: Some(100.0),
            cgpa: Some(10.0),
            assignments_completed: Some(8),
            assignments_total: Some(8),
            mentor_note: Some("dropped a course".to_string()),
        };
        assert!((model.infer(&known) - 0.1).abs() < 1e-9);
    }

    #[test]
    fn tier_round_trips_through_strings() {
        for tier in [RiskTier::High, RiskTier::Medium, RiskTier::Low, RiskTier::Unknown] {
            assert_eq!(tier.as_str().parse::<RiskTier>(), Ok(tier));
        }
        assert!("critical".parse::<RiskTier>().is_err());
    }
}
