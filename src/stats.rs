//! Cohort statistics and rankings over stored grade records.
//!
//! Everything here is a pure read. Percentages are derived from the
//! assessment definition at read time, never stored.

use crate::config::{self, GradingConfig, SubjectAveraging};
use crate::error::EngineResult;
use crate::grading::{round_off_1_decimal, CompetencyLevel};
use crate::store::{self, AssessmentDef, ClassSubjectInfo, GradeRecord, StudentRef};
use rusqlite::Connection;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LetterCount {
    pub letter: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelCount {
    pub level: CompetencyLevel,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectStatistics {
    pub class_subject_id: String,
    pub subject_name: String,
    pub term_id: String,
    pub assessment_count: usize,
    pub record_count: usize,
    pub students_assessed: usize,
    pub average_score: Option<f64>,
    pub highest_score: Option<f64>,
    pub lowest_score: Option<f64>,
    /// Fraction in `0..=1` of percentage-bearing records at or above the
    /// pass threshold.
    pub pass_rate: Option<f64>,
    pub grade_distribution: Vec<LetterCount>,
    pub competency_distribution: Vec<LevelCount>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedStudent {
    pub rank: usize,
    pub student_id: String,
    pub admission_no: String,
    pub display_name: String,
    pub average: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassStatistics {
    pub class_id: String,
    pub term_id: String,
    pub subjects: Vec<SubjectStatistics>,
    /// Mean of per-student averages, not of individual records.
    pub average_performance: Option<f64>,
    pub students_ranked: usize,
    pub top_performers: Vec<RankedStudent>,
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Every assessment and record of one class in one term.
pub(crate) struct TermSheet {
    pub subjects: Vec<ClassSubjectInfo>,
    pub defs: Vec<AssessmentDef>,
    pub records: Vec<GradeRecord>,
}

impl TermSheet {
    pub fn load(conn: &Connection, class_id: &str, term_id: &str) -> EngineResult<Self> {
        let subjects = store::class_subjects(conn, class_id)?;
        let defs = store::assessments_for(conn, class_id, None, term_id)?;
        let ids: Vec<String> = defs.iter().map(|d| d.id.clone()).collect();
        let records = store::grades_for_assessments(conn, &ids)?;
        Ok(Self {
            subjects,
            defs,
            records,
        })
    }

    /// Per-student, per-class-subject percentage. Only grade-based records
    /// contribute; a subject with no numeric results has no entry.
    pub fn subject_scores(
        &self,
        averaging: SubjectAveraging,
    ) -> HashMap<String, HashMap<String, f64>> {
        let defs: HashMap<&str, &AssessmentDef> =
            self.defs.iter().map(|d| (d.id.as_str(), d)).collect();

        // (student, class subject) -> (marks, max marks, percentages)
        let mut acc: HashMap<(&str, &str), (f64, f64, Vec<f64>)> = HashMap::new();
        for rec in &self.records {
            let Some(def) = defs.get(rec.assessment_def_id.as_str()) else {
                continue;
            };
            let Some(pct) = def.kind.percentage(rec.numeric_value) else {
                continue;
            };
            let entry = acc
                .entry((rec.student_id.as_str(), def.class_subject_id.as_str()))
                .or_default();
            entry.0 += rec.numeric_value.unwrap_or(0.0);
            entry.1 += def.kind.max_marks().unwrap_or(0.0);
            entry.2.push(pct);
        }

        let mut out: HashMap<String, HashMap<String, f64>> = HashMap::new();
        for ((student, cs), (marks, max, pcts)) in acc {
            let score = match averaging {
                SubjectAveraging::Unweighted => mean(&pcts),
                SubjectAveraging::MaxMarksWeighted if max > 0.0 => Some(100.0 * marks / max),
                SubjectAveraging::MaxMarksWeighted => None,
            };
            if let Some(score) = score {
                out.entry(student.to_string())
                    .or_default()
                    .insert(cs.to_string(), score);
            }
        }
        out
    }

    /// Mean of each student's subject scores, for students with any.
    pub fn student_averages(&self, averaging: SubjectAveraging) -> HashMap<String, f64> {
        self.subject_scores(averaging)
            .into_iter()
            .filter_map(|(student, subjects)| {
                let values: Vec<f64> = subjects.into_values().collect();
                mean(&values).map(|avg| (student, avg))
            })
            .collect()
    }
}

/// Standard competition ranks ("1224") for values already sorted from
/// best to worst.
pub fn competition_ranks(sorted_desc: &[f64]) -> Vec<usize> {
    let mut ranks = Vec::with_capacity(sorted_desc.len());
    for (i, v) in sorted_desc.iter().enumerate() {
        if i > 0 && sorted_desc[i - 1] == *v {
            ranks.push(ranks[i - 1]);
        } else {
            ranks.push(i + 1);
        }
    }
    ranks
}

/// Rank students by average (rounded to one decimal), ties by admission
/// number ascending. Students without an average are left out.
pub fn rank_students(students: &[StudentRef], averages: &HashMap<String, f64>) -> Vec<RankedStudent> {
    let mut rows: Vec<(&StudentRef, f64)> = students
        .iter()
        .filter_map(|s| averages.get(&s.id).map(|a| (s, round_off_1_decimal(*a))))
        .collect();
    rows.sort_by(|a, b| {
        b.1.total_cmp(&a.1)
            .then_with(|| a.0.admission_no.cmp(&b.0.admission_no))
    });
    let values: Vec<f64> = rows.iter().map(|(_, avg)| *avg).collect();
    let ranks = competition_ranks(&values);
    rows.into_iter()
        .zip(ranks)
        .map(|((s, average), rank)| RankedStudent {
            rank,
            student_id: s.id.clone(),
            admission_no: s.admission_no.clone(),
            display_name: s.display_name.clone(),
            average,
        })
        .collect()
}

fn subject_statistics(
    cs: &ClassSubjectInfo,
    term_id: &str,
    defs: &[&AssessmentDef],
    records: &[&GradeRecord],
    cfg: &GradingConfig,
) -> SubjectStatistics {
    let kinds: HashMap<&str, &AssessmentDef> = defs.iter().map(|d| (d.id.as_str(), *d)).collect();
    let pcts: Vec<f64> = records
        .iter()
        .filter_map(|r| {
            kinds
                .get(r.assessment_def_id.as_str())
                .and_then(|d| d.kind.percentage(r.numeric_value))
        })
        .collect();
    let students: BTreeSet<&str> = records.iter().map(|r| r.student_id.as_str()).collect();

    let passed = pcts.iter().filter(|p| **p >= cfg.pass_threshold).count();
    // Letters come from the current scale, not the one in force at write time.
    let letters: Vec<&str> = pcts
        .iter()
        .filter_map(|p| cfg.scale.band_for(*p))
        .map(|b| b.letter.as_str())
        .collect();
    let grade_distribution = cfg
        .scale
        .letters_desc()
        .map(|letter| LetterCount {
            letter: letter.to_string(),
            count: letters.iter().filter(|l| **l == letter).count(),
        })
        .collect();
    let competency_distribution = CompetencyLevel::ALL
        .iter()
        .rev()
        .map(|level| LevelCount {
            level: *level,
            count: records
                .iter()
                .filter(|r| r.competency_level == Some(*level))
                .count(),
        })
        .collect();

    SubjectStatistics {
        class_subject_id: cs.id.clone(),
        subject_name: cs.subject_name.clone(),
        term_id: term_id.to_string(),
        assessment_count: defs.len(),
        record_count: records.len(),
        students_assessed: students.len(),
        average_score: mean(&pcts).map(round_off_1_decimal),
        highest_score: pcts.iter().copied().reduce(f64::max).map(round_off_1_decimal),
        lowest_score: pcts.iter().copied().reduce(f64::min).map(round_off_1_decimal),
        pass_rate: (!pcts.is_empty()).then(|| passed as f64 / pcts.len() as f64),
        grade_distribution,
        competency_distribution,
    }
}

fn sheet_subject_statistics(
    sheet: &TermSheet,
    cs: &ClassSubjectInfo,
    term_id: &str,
    cfg: &GradingConfig,
) -> SubjectStatistics {
    let defs: Vec<&AssessmentDef> = sheet
        .defs
        .iter()
        .filter(|d| d.class_subject_id == cs.id)
        .collect();
    let records: Vec<&GradeRecord> = sheet
        .records
        .iter()
        .filter(|r| defs.iter().any(|d| d.id == r.assessment_def_id))
        .collect();
    subject_statistics(cs, term_id, &defs, &records, cfg)
}

pub fn compute_subject_statistics(
    conn: &Connection,
    class_subject_id: &str,
    term_id: &str,
) -> EngineResult<SubjectStatistics> {
    let cs = store::load_class_subject(conn, class_subject_id)?;
    store::load_term(conn, term_id)?;
    let cfg = config::load_for_class(conn, &cs.class_id)?;
    let defs = store::assessments_for(conn, &cs.class_id, Some(&cs.id), term_id)?;
    let ids: Vec<String> = defs.iter().map(|d| d.id.clone()).collect();
    let records = store::grades_for_assessments(conn, &ids)?;

    let def_refs: Vec<&AssessmentDef> = defs.iter().collect();
    let record_refs: Vec<&GradeRecord> = records.iter().collect();
    let stats = subject_statistics(&cs, term_id, &def_refs, &record_refs, &cfg);
    debug!(
        class_subject = %cs.id,
        term = term_id,
        records = stats.record_count,
        "subject statistics computed"
    );
    Ok(stats)
}

pub fn compute_class_statistics(
    conn: &Connection,
    class_id: &str,
    term_id: &str,
) -> EngineResult<ClassStatistics> {
    let class = store::load_class(conn, class_id)?;
    store::load_term(conn, term_id)?;
    let cfg = config::load(conn, class.school_id.as_deref())?;
    let sheet = TermSheet::load(conn, class_id, term_id)?;
    let students = store::active_students(conn, class_id)?;

    let subjects = sheet
        .subjects
        .iter()
        .map(|cs| sheet_subject_statistics(&sheet, cs, term_id, &cfg))
        .collect();

    let averages = sheet.student_averages(cfg.subject_averaging);
    let ranked = rank_students(&students, &averages);
    let per_student: Vec<f64> = students
        .iter()
        .filter_map(|s| averages.get(&s.id).copied())
        .collect();

    debug!(class = class_id, term = term_id, ranked = ranked.len(), "class statistics computed");
    Ok(ClassStatistics {
        class_id: class.id,
        term_id: term_id.to_string(),
        subjects,
        average_performance: mean(&per_student).map(round_off_1_decimal),
        students_ranked: ranked.len(),
        top_performers: ranked.into_iter().take(cfg.top_performers).collect(),
    })
}
