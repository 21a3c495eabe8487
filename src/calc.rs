use serde::{Deserialize, Serialize};

/// Tolerance for the fractional settings weights summing to 1.0.
pub const WEIGHT_SUM_TOLERANCE: f64 = 0.001;
/// Tolerance under which raw weights already at the target pass through
/// unchanged instead of being rescaled.
const NORMALIZE_TOLERANCE: f64 = 1e-6;

pub fn round_2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

pub fn round_3(x: f64) -> f64 {
    (x * 1000.0).round() / 1000.0
}

#[derive(Debug, Clone, Serialize)]
pub struct CalcError {
    pub code: String,
    pub message: String,
}

impl CalcError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

/// A component score that has not been entered yet is Pending, never 0.
/// Pending components block the final score instead of deflating it.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum ComponentScore {
    #[default]
    Pending,
    Scored(f64),
}

impl ComponentScore {
    pub fn from_opt(v: Option<f64>) -> Self {
        match v {
            Some(x) => Self::Scored(x),
            None => Self::Pending,
        }
    }

    pub fn value(self) -> Option<f64> {
        match self {
            Self::Pending => None,
            Self::Scored(v) => Some(v),
        }
    }
}

/// Per-record weight overrides, percent scale. They need not sum to 100;
/// normalization resolves that at calculation time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentWeights {
    pub activity: f64,
    pub quiz: f64,
    pub exam: f64,
}

/// Rescale three non-negative weights to sum to `target` while preserving
/// their ratios. An all-zero input has no defined scaling and is rejected.
pub fn normalize_weights(raw: [f64; 3], target: f64) -> Result<[f64; 3], CalcError> {
    if raw.iter().any(|w| *w < 0.0) {
        return Err(CalcError::new(
            "invariant_violation",
            "weights must be non-negative",
        ));
    }
    if target <= 0.0 {
        return Err(CalcError::new(
            "invariant_violation",
            "normalization target must be positive",
        ));
    }
    let sum: f64 = raw.iter().sum();
    if sum == 0.0 {
        return Err(CalcError::new(
            "invariant_violation",
            "cannot normalize all-zero weights",
        ));
    }
    if (sum - target).abs() <= NORMALIZE_TOLERANCE {
        return Ok(raw);
    }
    let scale = target / sum;
    Ok([raw[0] * scale, raw[1] * scale, raw[2] * scale])
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FinalScore {
    /// At least one component score is missing; no number is produced.
    Pending,
    Ready(f64),
}

impl FinalScore {
    pub fn value(self) -> Option<f64> {
        match self {
            Self::Pending => None,
            Self::Ready(v) => Some(v),
        }
    }
}

/// The two grading modes are a tagged variant so that a legacy record can
/// never carry component scores and vice versa.
#[derive(Debug, Clone, PartialEq)]
pub enum GradeRecord {
    Legacy {
        grade: f64,
    },
    Component {
        activity: ComponentScore,
        quiz: ComponentScore,
        exam: ComponentScore,
        weights: Option<ComponentWeights>,
    },
}

impl GradeRecord {
    pub fn mode_label(&self) -> &'static str {
        match self {
            Self::Legacy { .. } => "legacy",
            Self::Component { .. } => "component",
        }
    }

    /// Derive the final score. Legacy records are their stored scalar.
    /// Component records need all three scores present; effective weights
    /// come from the per-record override or else from `settings`, always
    /// normalized to the percent scale before applying.
    pub fn final_score(&self, settings: &GradeSettings) -> Result<FinalScore, CalcError> {
        match self {
            Self::Legacy { grade } => Ok(FinalScore::Ready(*grade)),
            Self::Component {
                activity,
                quiz,
                exam,
                weights,
            } => {
                let (Some(a), Some(q), Some(e)) = (activity.value(), quiz.value(), exam.value())
                else {
                    return Ok(FinalScore::Pending);
                };
                let raw = match weights {
                    Some(w) => [w.activity, w.quiz, w.exam],
                    None => [
                        settings.activity_weight * 100.0,
                        settings.quiz_weight * 100.0,
                        settings.exam_weight * 100.0,
                    ],
                };
                let [wa, wq, we] = normalize_weights(raw, 100.0)?;
                let final_score = a * (wa / 100.0) + q * (wq / 100.0) + e * (we / 100.0);
                Ok(FinalScore::Ready(round_2(final_score)))
            }
        }
    }
}

/// Fixed 12-bucket letter scale; boundaries are inclusive upward.
pub fn letter_grade(score: f64) -> &'static str {
    if score >= 97.0 {
        "A+"
    } else if score >= 93.0 {
        "A"
    } else if score >= 90.0 {
        "A-"
    } else if score >= 87.0 {
        "B+"
    } else if score >= 83.0 {
        "B"
    } else if score >= 80.0 {
        "B-"
    } else if score >= 77.0 {
        "C+"
    } else if score >= 73.0 {
        "C"
    } else if score >= 70.0 {
        "C-"
    } else if score >= 67.0 {
        "D+"
    } else if score >= 65.0 {
        "D"
    } else {
        "F"
    }
}

/// Single-threshold policy, boundary inclusive: a score equal to the
/// threshold passes.
pub fn pass_fail(score: f64, threshold: f64) -> &'static str {
    if score >= threshold {
        "Passed"
    } else {
        "Failed"
    }
}

/// Process-wide grading parameters. Weights are fractions that must sum to
/// 1.0 within `WEIGHT_SUM_TOLERANCE`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeSettings {
    pub quiz_weight: f64,
    pub activity_weight: f64,
    pub exam_weight: f64,
    pub passing_grade: f64,
}

impl Default for GradeSettings {
    fn default() -> Self {
        Self {
            quiz_weight: 0.30,
            activity_weight: 0.30,
            exam_weight: 0.40,
            passing_grade: 60.0,
        }
    }
}

impl GradeSettings {
    pub fn validate(&self) -> Result<(), CalcError> {
        for (name, w) in [
            ("quizWeight", self.quiz_weight),
            ("activityWeight", self.activity_weight),
            ("examWeight", self.exam_weight),
        ] {
            if !(0.0..=1.0).contains(&w) {
                return Err(CalcError::new(
                    "invariant_violation",
                    format!("{} must be between 0 and 1", name),
                ));
            }
        }
        let sum = self.quiz_weight + self.activity_weight + self.exam_weight;
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(CalcError::new(
                "invariant_violation",
                format!("weights must sum to 1.0, got {:.3}", sum),
            ));
        }
        if !(0.0..=100.0).contains(&self.passing_grade) {
            return Err(CalcError::new(
                "invariant_violation",
                "passingGrade must be between 0 and 100",
            ));
        }
        Ok(())
    }
}

/// Component values as stored, for audit comparison.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Components {
    pub quiz: ComponentScore,
    pub activity: ComponentScore,
    pub exam: ComponentScore,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeFieldChange {
    pub field: &'static str,
    pub old_value: Option<f64>,
    pub new_value: Option<f64>,
}

/// Field-by-field diff for the audit trail. A record saved for the first
/// time (`old` is None) produces no entries: only subsequent changes are
/// audited.
pub fn diff_components(old: Option<Components>, new: Components) -> Vec<GradeFieldChange> {
    let Some(old) = old else {
        return Vec::new();
    };
    let mut changes = Vec::new();
    for (field, old_v, new_v) in [
        ("quiz", old.quiz.value(), new.quiz.value()),
        ("activity", old.activity.value(), new.activity.value()),
        ("exam", old.exam.value(), new.exam.value()),
    ] {
        if old_v != new_v {
            changes.push(GradeFieldChange {
                field,
                old_value: old_v,
                new_value: new_v,
            });
        }
    }
    changes
}
