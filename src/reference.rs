//! Upserts of reference entities pushed in by the services that own them.
//!
//! The engine never creates students, classes or assessments on its own;
//! this is the feed those services use to keep the workspace in sync.

use crate::error::{EngineError, EngineResult};
use crate::grading::AssessmentKind;
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReferenceBundle {
    pub academic_years: Vec<AcademicYearIn>,
    pub terms: Vec<TermIn>,
    pub classes: Vec<ClassIn>,
    pub students: Vec<StudentIn>,
    pub subjects: Vec<SubjectIn>,
    pub class_subjects: Vec<ClassSubjectIn>,
    pub assessments: Vec<AssessmentIn>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcademicYearIn {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TermIn {
    pub id: String,
    pub name: String,
    pub academic_year_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassIn {
    pub id: String,
    pub name: String,
    pub school_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentIn {
    pub id: String,
    pub class_id: String,
    pub admission_no: String,
    pub last_name: String,
    pub first_name: String,
    #[serde(default = "default_active")]
    pub active: bool,
    pub sort_order: Option<i64>,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectIn {
    pub id: String,
    pub code: Option<String>,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassSubjectIn {
    pub id: String,
    pub class_id: String,
    pub subject_id: String,
    pub sort_order: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssessmentIn {
    pub id: String,
    pub name: String,
    pub kind: String,
    pub max_marks: Option<f64>,
    pub class_subject_id: String,
    pub term_id: String,
    pub academic_year_id: Option<String>,
    pub strand_id: Option<String>,
    pub sort_order: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportCounts {
    pub academic_years: usize,
    pub terms: usize,
    pub classes: usize,
    pub students: usize,
    pub subjects: usize,
    pub class_subjects: usize,
    pub assessments: usize,
}

fn validate_assessment(a: &AssessmentIn) -> EngineResult<&'static str> {
    let Some(kind) = AssessmentKind::parse(&a.kind) else {
        return Err(EngineError::validation(format!(
            "assessment '{}' has unknown kind '{}'",
            a.id, a.kind
        )));
    };
    match (kind, a.max_marks) {
        ("grade", Some(m)) if m.is_finite() && m > 0.0 => Ok(kind),
        ("grade", _) => Err(EngineError::configuration(format!(
            "grade-based assessment '{}' needs maxMarks > 0",
            a.id
        ))),
        (_, Some(_)) => Err(EngineError::validation(format!(
            "assessment '{}' is {} and must not carry maxMarks",
            a.id, kind
        ))),
        (_, None) => Ok(kind),
    }
}

/// A graded assessment keeps its kind, and its maxMarks may not drop below
/// the highest mark already stored against it.
fn guard_graded_assessment(conn: &Connection, a: &AssessmentIn, kind: &str) -> EngineResult<()> {
    let row: Option<(String, Option<f64>, i64)> = conn
        .query_row(
            "SELECT a.kind, MAX(g.numeric_value), COUNT(g.id)
             FROM assessment_defs a
             LEFT JOIN grade_records g ON g.assessment_def_id = a.id
             WHERE a.id = ?
             GROUP BY a.id",
            [&a.id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()?;
    let Some((stored_kind, top_mark, graded)) = row else {
        return Ok(());
    };
    if graded == 0 {
        return Ok(());
    }
    if stored_kind != kind {
        return Err(EngineError::configuration(format!(
            "assessment '{}' has {} grade records; kind cannot change from {} to {}",
            a.id, graded, stored_kind, kind
        )));
    }
    if let (Some(top), Some(max)) = (top_mark, a.max_marks) {
        if max < top {
            return Err(EngineError::configuration(format!(
                "assessment '{}' maxMarks {} is below stored marks {}",
                a.id, max, top
            )));
        }
    }
    Ok(())
}

/// Apply the whole bundle in one transaction; any bad entity rejects it all.
pub fn import_reference(conn: &Connection, bundle: &ReferenceBundle) -> EngineResult<ImportCounts> {
    let kinds = bundle
        .assessments
        .iter()
        .map(validate_assessment)
        .collect::<EngineResult<Vec<_>>>()?;

    let tx = conn.unchecked_transaction()?;
    let mut counts = ImportCounts::default();

    for y in &bundle.academic_years {
        tx.execute(
            "INSERT INTO academic_years(id, name) VALUES(?, ?)
             ON CONFLICT(id) DO UPDATE SET name = excluded.name",
            (&y.id, &y.name),
        )?;
        counts.academic_years += 1;
    }
    for t in &bundle.terms {
        tx.execute(
            "INSERT INTO terms(id, name, academic_year_id) VALUES(?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
               name = excluded.name,
               academic_year_id = excluded.academic_year_id",
            (&t.id, &t.name, &t.academic_year_id),
        )?;
        counts.terms += 1;
    }
    for c in &bundle.classes {
        tx.execute(
            "INSERT INTO classes(id, name, school_id) VALUES(?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
               name = excluded.name,
               school_id = excluded.school_id",
            (&c.id, &c.name, &c.school_id),
        )?;
        counts.classes += 1;
    }
    for (i, s) in bundle.students.iter().enumerate() {
        tx.execute(
            "INSERT INTO students(id, class_id, admission_no, last_name, first_name, active, sort_order)
             VALUES(?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
               class_id = excluded.class_id,
               admission_no = excluded.admission_no,
               last_name = excluded.last_name,
               first_name = excluded.first_name,
               active = excluded.active,
               sort_order = excluded.sort_order",
            (
                &s.id,
                &s.class_id,
                s.admission_no.trim(),
                &s.last_name,
                &s.first_name,
                s.active as i64,
                s.sort_order.unwrap_or(i as i64),
            ),
        )?;
        counts.students += 1;
    }
    for s in &bundle.subjects {
        tx.execute(
            "INSERT INTO subjects(id, code, name) VALUES(?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET code = excluded.code, name = excluded.name",
            (&s.id, &s.code, &s.name),
        )?;
        counts.subjects += 1;
    }
    for (i, cs) in bundle.class_subjects.iter().enumerate() {
        tx.execute(
            "INSERT INTO class_subjects(id, class_id, subject_id, sort_order) VALUES(?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
               class_id = excluded.class_id,
               subject_id = excluded.subject_id,
               sort_order = excluded.sort_order",
            (
                &cs.id,
                &cs.class_id,
                &cs.subject_id,
                cs.sort_order.unwrap_or(i as i64),
            ),
        )?;
        counts.class_subjects += 1;
    }
    for (i, (a, kind)) in bundle.assessments.iter().zip(kinds).enumerate() {
        guard_graded_assessment(&tx, a, kind)?;
        tx.execute(
            "INSERT INTO assessment_defs(
                id, name, kind, max_marks, class_subject_id, term_id,
                academic_year_id, strand_id, sort_order)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
               name = excluded.name,
               kind = excluded.kind,
               max_marks = excluded.max_marks,
               class_subject_id = excluded.class_subject_id,
               term_id = excluded.term_id,
               academic_year_id = excluded.academic_year_id,
               strand_id = excluded.strand_id,
               sort_order = excluded.sort_order",
            (
                &a.id,
                &a.name,
                kind,
                a.max_marks,
                &a.class_subject_id,
                &a.term_id,
                &a.academic_year_id,
                &a.strand_id,
                a.sort_order.unwrap_or(i as i64),
            ),
        )?;
        counts.assessments += 1;
    }

    tx.commit()?;
    info!(
        classes = counts.classes,
        students = counts.students,
        assessments = counts.assessments,
        "reference data imported"
    );
    Ok(counts)
}
