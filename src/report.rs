//! Student report cards and class reports.

use crate::config;
use crate::error::EngineResult;
use crate::grading::{grade_percentage, round_off_1_decimal, CompetencyLevel, GradeScale};
use crate::stats::{self, ClassStatistics, LevelCount, TermSheet};
use crate::store::{self, ClassInfo, StudentRef, TermInfo};
use rusqlite::Connection;
use serde::Serialize;
use tracing::info;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssessmentLine {
    pub assessment_def_id: String,
    pub name: String,
    pub kind: &'static str,
    pub marks: Option<f64>,
    pub max_marks: Option<f64>,
    pub percentage: Option<f64>,
    pub letter_grade: Option<String>,
    pub points: Option<i64>,
    pub competency_level: Option<CompetencyLevel>,
    pub remark: Option<String>,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectLine {
    pub class_subject_id: String,
    pub subject_name: String,
    pub subject_code: Option<String>,
    pub percentage: Option<f64>,
    pub letter_grade: Option<String>,
    pub points: Option<i64>,
    pub remark: Option<String>,
    pub assessments: Vec<AssessmentLine>,
    pub competency_summary: Vec<LevelCount>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentReport {
    pub student: StudentRef,
    pub class: ClassInfo,
    pub term: TermInfo,
    pub subjects: Vec<SubjectLine>,
    pub average_percentage: Option<f64>,
    pub overall_grade: Option<String>,
    pub overall_points: Option<i64>,
    pub overall_remark: Option<String>,
    /// Competition rank in the class for the term; absent without numeric results.
    pub overall_position: Option<usize>,
    pub total_students: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassReport {
    pub class: ClassInfo,
    pub term: TermInfo,
    pub overall_grade: Option<String>,
    #[serde(flatten)]
    pub statistics: ClassStatistics,
}

/// Letter, points and remark for a rounded percentage.
fn band_of(
    pct: Option<f64>,
    scale: &GradeScale,
) -> EngineResult<(Option<String>, Option<i64>, Option<String>)> {
    let Some(p) = pct else {
        return Ok((None, None, None));
    };
    let band = grade_percentage(p, scale)?;
    Ok((
        Some(band.letter.clone()),
        Some(band.points),
        Some(band.remark.clone()),
    ))
}

pub fn generate_student_report(
    conn: &Connection,
    student_id: &str,
    term_id: &str,
) -> EngineResult<StudentReport> {
    let student = store::load_student(conn, student_id)?;
    let term = store::load_term(conn, term_id)?;
    let class = store::load_class(conn, &student.class_id)?;
    let cfg = config::load(conn, class.school_id.as_deref())?;
    let sheet = TermSheet::load(conn, &class.id, term_id)?;

    let scores = sheet.subject_scores(cfg.subject_averaging);
    let own = scores.get(&student.id);

    let mut subjects = Vec::with_capacity(sheet.subjects.len());
    let mut subject_pcts = Vec::new();
    for cs in &sheet.subjects {
        let mut assessments = Vec::new();
        let mut levels = Vec::new();
        for def in sheet.defs.iter().filter(|d| d.class_subject_id == cs.id) {
            let Some(rec) = sheet
                .records
                .iter()
                .find(|r| r.assessment_def_id == def.id && r.student_id == student.id)
            else {
                continue;
            };
            if let Some(level) = rec.competency_level {
                levels.push(level);
            }
            let pct = def.kind.percentage(rec.numeric_value);
            // Marked lines are regraded against the current scale; the stored
            // letter is only what the scale said at write time.
            let (letter_grade, points, remark) = match pct.and_then(|p| cfg.scale.band_for(p)) {
                Some(band) => (
                    Some(band.letter.clone()),
                    Some(band.points),
                    Some(band.remark.clone()),
                ),
                None => (rec.letter_grade.clone(), rec.points, rec.remark.clone()),
            };
            assessments.push(AssessmentLine {
                assessment_def_id: def.id.clone(),
                name: def.name.clone(),
                kind: def.kind.code(),
                marks: rec.numeric_value,
                max_marks: def.kind.max_marks(),
                percentage: pct.map(round_off_1_decimal),
                letter_grade,
                points,
                competency_level: rec.competency_level,
                remark,
                comment: rec.comment.clone(),
            });
        }

        let raw = own.and_then(|m| m.get(&cs.id)).copied();
        if let Some(p) = raw {
            subject_pcts.push(p);
        }
        let percentage = raw.map(round_off_1_decimal);
        let (letter_grade, points, remark) = band_of(percentage, &cfg.scale)?;
        let competency_summary = CompetencyLevel::ALL
            .iter()
            .rev()
            .filter_map(|level| {
                let count = levels.iter().filter(|l| *l == level).count();
                (count > 0).then_some(LevelCount {
                    level: *level,
                    count,
                })
            })
            .collect();

        subjects.push(SubjectLine {
            class_subject_id: cs.id.clone(),
            subject_name: cs.subject_name.clone(),
            subject_code: cs.subject_code.clone(),
            percentage,
            letter_grade,
            points,
            remark,
            assessments,
            competency_summary,
        });
    }

    let average_percentage = (!subject_pcts.is_empty())
        .then(|| subject_pcts.iter().sum::<f64>() / subject_pcts.len() as f64)
        .map(round_off_1_decimal);
    let (overall_grade, overall_points, overall_remark) =
        band_of(average_percentage, &cfg.scale)?;

    let students = store::active_students(conn, &class.id)?;
    let ranked = stats::rank_students(&students, &sheet.student_averages(cfg.subject_averaging));
    let overall_position = ranked
        .iter()
        .find(|r| r.student_id == student.id)
        .map(|r| r.rank);

    info!(
        student = %student.id,
        term = term_id,
        position = ?overall_position,
        of = ranked.len(),
        "student report generated"
    );
    Ok(StudentReport {
        student,
        class,
        term,
        subjects,
        average_percentage,
        overall_grade,
        overall_points,
        overall_remark,
        overall_position,
        total_students: ranked.len(),
    })
}

pub fn generate_class_report(
    conn: &Connection,
    class_id: &str,
    term_id: &str,
) -> EngineResult<ClassReport> {
    let class = store::load_class(conn, class_id)?;
    let term = store::load_term(conn, term_id)?;
    let cfg = config::load(conn, class.school_id.as_deref())?;
    let statistics = stats::compute_class_statistics(conn, class_id, term_id)?;
    let (overall_grade, _, _) = band_of(statistics.average_performance, &cfg.scale)?;

    info!(
        class = class_id,
        term = term_id,
        subjects = statistics.subjects.len(),
        "class report generated"
    );
    Ok(ClassReport {
        class,
        term,
        overall_grade,
        statistics,
    })
}
