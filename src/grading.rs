use crate::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use std::fmt;

const BOUNDARY_EPS: f64 = 1e-9;

/// One-decimal rounding used for every percentage the engine reports:
/// `floor(10*x + 0.5) / 10`
pub fn round_off_1_decimal(x: f64) -> f64 {
    ((10.0 * x) + 0.5).floor() / 10.0
}

/// Qualitative outcome used instead of numeric marks.
/// Ordering follows the ordinal: `Below < Approaching < Meeting < Exceeding`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompetencyLevel {
    Below,
    Approaching,
    Meeting,
    Exceeding,
}

impl CompetencyLevel {
    /// Highest level first.
    pub const ALL: [CompetencyLevel; 4] = [
        CompetencyLevel::Exceeding,
        CompetencyLevel::Meeting,
        CompetencyLevel::Approaching,
        CompetencyLevel::Below,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CompetencyLevel::Exceeding => "EXCEEDING",
            CompetencyLevel::Meeting => "MEETING",
            CompetencyLevel::Approaching => "APPROACHING",
            CompetencyLevel::Below => "BELOW",
        }
    }

    /// Accepts the full names and the EE/ME/AE/BE shorthands, any case.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "EXCEEDING" | "EE" => Some(CompetencyLevel::Exceeding),
            "MEETING" | "ME" => Some(CompetencyLevel::Meeting),
            "APPROACHING" | "AE" => Some(CompetencyLevel::Approaching),
            "BELOW" | "BE" => Some(CompetencyLevel::Below),
            _ => None,
        }
    }

    pub fn points(self) -> i64 {
        match self {
            CompetencyLevel::Exceeding => 4,
            CompetencyLevel::Meeting => 3,
            CompetencyLevel::Approaching => 2,
            CompetencyLevel::Below => 1,
        }
    }

    pub fn default_remark(self) -> &'static str {
        match self {
            CompetencyLevel::Exceeding => "Exceeding expectations",
            CompetencyLevel::Meeting => "Meeting expectations",
            CompetencyLevel::Approaching => "Approaching expectations",
            CompetencyLevel::Below => "Below expectations",
        }
    }
}

impl fmt::Display for CompetencyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How an assessment is graded. Grade-based assessments carry their
/// maximum marks; the other kinds have no numeric payload.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum AssessmentKind {
    #[serde(rename_all = "camelCase")]
    GradeBased { max_marks: f64 },
    CompetencyBased,
    Holistic,
}

impl AssessmentKind {
    /// Stored form is `kind` text plus a nullable `max_marks` column.
    /// A grade-based row without max marks keeps `0.0`, which [`compute`]
    /// rejects as a configuration error.
    pub fn from_db(kind: &str, max_marks: Option<f64>) -> EngineResult<Self> {
        match kind {
            "grade" => Ok(AssessmentKind::GradeBased {
                max_marks: max_marks.unwrap_or(0.0),
            }),
            "competency" => Ok(AssessmentKind::CompetencyBased),
            "holistic" => Ok(AssessmentKind::Holistic),
            other => Err(EngineError::configuration(format!(
                "unknown assessment kind '{}'",
                other
            ))),
        }
    }

    pub fn parse(raw: &str) -> Option<&'static str> {
        match raw
            .trim()
            .to_ascii_lowercase()
            .replace(['-', '_', ' '], "")
            .as_str()
        {
            "grade" | "gradebased" => Some("grade"),
            "competency" | "competencybased" => Some("competency"),
            "holistic" => Some("holistic"),
            _ => None,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AssessmentKind::GradeBased { .. } => "grade",
            AssessmentKind::CompetencyBased => "competency",
            AssessmentKind::Holistic => "holistic",
        }
    }

    pub fn max_marks(&self) -> Option<f64> {
        match self {
            AssessmentKind::GradeBased { max_marks } => Some(*max_marks),
            _ => None,
        }
    }

    /// Normalized percentage for a stored numeric value, if one can be derived.
    pub fn percentage(&self, value: Option<f64>) -> Option<f64> {
        match (self, value) {
            (AssessmentKind::GradeBased { max_marks }, Some(v)) if *max_marks > 0.0 => {
                Some(100.0 * v / max_marks)
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeBand {
    pub min_percent: f64,
    pub max_percent: f64,
    pub letter: String,
    pub points: i64,
    pub remark: String,
}

impl GradeBand {
    fn new(min: f64, max: f64, letter: &str, points: i64, remark: &str) -> Self {
        Self {
            min_percent: min,
            max_percent: max,
            letter: letter.to_string(),
            points,
            remark: remark.to_string(),
        }
    }
}

/// Percentage bands covering `[0, 100]` without gaps or overlaps.
///
/// Each band owns `[min, max)`; the top band also owns `100`. Adjacent
/// bands share their boundary value exactly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<GradeBand>", into = "Vec<GradeBand>")]
pub struct GradeScale {
    bands: Vec<GradeBand>,
}

impl GradeScale {
    pub fn new(mut bands: Vec<GradeBand>) -> EngineResult<Self> {
        bands.sort_by(|a, b| a.min_percent.total_cmp(&b.min_percent));
        validate_bands(&bands)?;
        Ok(Self { bands })
    }

    /// Twelve-band A..E scale with 12..1 points.
    pub fn standard() -> Self {
        let bands = vec![
            GradeBand::new(0.0, 30.0, "E", 1, "Very Poor"),
            GradeBand::new(30.0, 35.0, "D-", 2, "Poor"),
            GradeBand::new(35.0, 40.0, "D", 3, "Weak"),
            GradeBand::new(40.0, 45.0, "D+", 4, "Weak"),
            GradeBand::new(45.0, 50.0, "C-", 5, "Below Average"),
            GradeBand::new(50.0, 55.0, "C", 6, "Average"),
            GradeBand::new(55.0, 60.0, "C+", 7, "Fair"),
            GradeBand::new(60.0, 65.0, "B-", 8, "Fairly Good"),
            GradeBand::new(65.0, 70.0, "B", 9, "Good"),
            GradeBand::new(70.0, 75.0, "B+", 10, "Good"),
            GradeBand::new(75.0, 80.0, "A-", 11, "Very Good"),
            GradeBand::new(80.0, 100.0, "A", 12, "Excellent"),
        ];
        Self { bands }
    }

    pub fn bands(&self) -> &[GradeBand] {
        &self.bands
    }

    /// Letters from the highest band down.
    pub fn letters_desc(&self) -> impl Iterator<Item = &str> {
        self.bands.iter().rev().map(|b| b.letter.as_str())
    }

    pub fn band_for(&self, percent: f64) -> Option<&GradeBand> {
        if !percent.is_finite() || percent < 0.0 || percent > 100.0 {
            return None;
        }
        let last = self.bands.len().checked_sub(1)?;
        self.bands.iter().enumerate().find_map(|(i, b)| {
            let in_band = percent >= b.min_percent
                && (percent < b.max_percent || (i == last && percent <= b.max_percent));
            in_band.then_some(b)
        })
    }
}

impl Default for GradeScale {
    fn default() -> Self {
        Self::standard()
    }
}

impl TryFrom<Vec<GradeBand>> for GradeScale {
    type Error = EngineError;

    fn try_from(bands: Vec<GradeBand>) -> Result<Self, Self::Error> {
        GradeScale::new(bands)
    }
}

impl From<GradeScale> for Vec<GradeBand> {
    fn from(scale: GradeScale) -> Self {
        scale.bands
    }
}

fn validate_bands(bands: &[GradeBand]) -> EngineResult<()> {
    let (Some(first), Some(last)) = (bands.first(), bands.last()) else {
        return Err(EngineError::configuration("grade scale has no bands"));
    };
    if first.min_percent.abs() > BOUNDARY_EPS {
        return Err(EngineError::configuration(format!(
            "grade scale must start at 0, first band '{}' starts at {}",
            first.letter, first.min_percent
        )));
    }
    if (last.max_percent - 100.0).abs() > BOUNDARY_EPS {
        return Err(EngineError::configuration(format!(
            "grade scale must end at 100, last band '{}' ends at {}",
            last.letter, last.max_percent
        )));
    }

    let mut letters = std::collections::HashSet::new();
    for b in bands {
        if !b.min_percent.is_finite() || !b.max_percent.is_finite() || b.min_percent >= b.max_percent
        {
            return Err(EngineError::configuration(format!(
                "band '{}' has an empty or invalid range {}..{}",
                b.letter, b.min_percent, b.max_percent
            )));
        }
        if b.letter.trim().is_empty() {
            return Err(EngineError::configuration("band letter must not be empty"));
        }
        if !letters.insert(b.letter.as_str()) {
            return Err(EngineError::configuration(format!(
                "duplicate band letter '{}'",
                b.letter
            )));
        }
    }

    for pair in bands.windows(2) {
        let (lo, hi) = (&pair[0], &pair[1]);
        let delta = hi.min_percent - lo.max_percent;
        if delta > BOUNDARY_EPS {
            return Err(EngineError::configuration(format!(
                "grade scale has a gap between '{}' ({}) and '{}' ({})",
                lo.letter, lo.max_percent, hi.letter, hi.min_percent
            )));
        }
        if delta < -BOUNDARY_EPS {
            return Err(EngineError::configuration(format!(
                "grade scale bands '{}' and '{}' overlap",
                lo.letter, hi.letter
            )));
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GradeValue {
    Marks(f64),
    Competency(CompetencyLevel),
    Unscored,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GradeInput {
    pub value: GradeValue,
    pub comment: Option<String>,
    /// Caller-supplied remark; only honoured for competency-based grading.
    pub remark: Option<String>,
}

impl GradeInput {
    pub fn marks(marks: f64) -> Self {
        Self {
            value: GradeValue::Marks(marks),
            comment: None,
            remark: None,
        }
    }

    pub fn competency(level: CompetencyLevel) -> Self {
        Self {
            value: GradeValue::Competency(level),
            comment: None,
            remark: None,
        }
    }

    pub fn comment_only(comment: impl Into<String>) -> Self {
        Self {
            value: GradeValue::Unscored,
            comment: Some(comment.into()),
            remark: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeOutcome {
    pub numeric_value: Option<f64>,
    pub percentage: Option<f64>,
    pub letter_grade: Option<String>,
    pub points: Option<i64>,
    pub competency_level: Option<CompetencyLevel>,
    pub remark: Option<String>,
    pub comment: Option<String>,
}

fn non_empty(s: &Option<String>) -> Option<String> {
    s.as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

/// Map one raw input to its standardized outcome for the given assessment kind.
pub fn compute(
    kind: &AssessmentKind,
    input: &GradeInput,
    scale: &GradeScale,
) -> EngineResult<GradeOutcome> {
    let comment = non_empty(&input.comment);
    match (kind, input.value) {
        (AssessmentKind::GradeBased { max_marks }, GradeValue::Marks(marks)) => {
            let max_marks = *max_marks;
            if !max_marks.is_finite() || max_marks <= 0.0 {
                return Err(EngineError::configuration(format!(
                    "grade-based assessment needs maxMarks > 0, found {}",
                    max_marks
                )));
            }
            if !marks.is_finite() {
                return Err(EngineError::validation("marks must be a finite number"));
            }
            if marks < 0.0 {
                return Err(EngineError::validation(format!(
                    "marks out of range: {} is negative",
                    marks
                )));
            }
            if marks > max_marks {
                return Err(EngineError::validation(format!(
                    "marks out of range: {} exceeds maxMarks {}",
                    marks, max_marks
                )));
            }
            let percentage = 100.0 * marks / max_marks;
            let band = grade_percentage(percentage, scale)?;
            Ok(GradeOutcome {
                numeric_value: Some(marks),
                percentage: Some(percentage),
                letter_grade: Some(band.letter.clone()),
                points: Some(band.points),
                competency_level: None,
                remark: Some(band.remark.clone()),
                comment,
            })
        }
        (AssessmentKind::GradeBased { .. }, _) => Err(EngineError::validation(
            "grade-based assessment requires numeric marks",
        )),
        (AssessmentKind::CompetencyBased, GradeValue::Competency(level)) => {
            let remark =
                non_empty(&input.remark).unwrap_or_else(|| level.default_remark().to_string());
            Ok(GradeOutcome {
                numeric_value: None,
                percentage: None,
                letter_grade: None,
                points: Some(level.points()),
                competency_level: Some(level),
                remark: Some(remark),
                comment,
            })
        }
        (AssessmentKind::CompetencyBased, _) => Err(EngineError::validation(
            "competency-based assessment requires a competency level",
        )),
        (AssessmentKind::Holistic, GradeValue::Unscored) => {
            let Some(comment) = comment else {
                return Err(EngineError::validation(
                    "holistic assessment requires a comment",
                ));
            };
            Ok(GradeOutcome {
                numeric_value: None,
                percentage: None,
                letter_grade: None,
                points: None,
                competency_level: None,
                remark: Some(comment.clone()),
                comment: Some(comment),
            })
        }
        (AssessmentKind::Holistic, _) => Err(EngineError::validation(
            "holistic assessment takes a comment only, not marks or levels",
        )),
    }
}

/// Band for an already normalized percentage (subject or overall averages).
pub fn grade_percentage(percent: f64, scale: &GradeScale) -> EngineResult<&GradeBand> {
    if !percent.is_finite() || !(0.0..=100.0).contains(&percent) {
        return Err(EngineError::validation(format!(
            "percentage {} is outside 0..100",
            percent
        )));
    }
    scale.band_for(percent).ok_or_else(|| {
        EngineError::configuration(format!("no grade band covers {}%", percent))
    })
}
