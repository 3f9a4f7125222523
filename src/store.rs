//! Read and write access to the workspace database.
//!
//! Reference entities (classes, students, subjects, terms, assessments) are
//! owned by other services; this module only reads them. Grade records are
//! written exclusively through [`upsert_grade`].

use crate::error::{EngineError, EngineResult};
use crate::grading::{AssessmentKind, CompetencyLevel, GradeOutcome};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension, Row};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassInfo {
    pub id: String,
    pub name: String,
    pub school_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TermInfo {
    pub id: String,
    pub name: String,
    pub academic_year_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassSubjectInfo {
    pub id: String,
    pub class_id: String,
    pub subject_id: String,
    pub subject_code: Option<String>,
    pub subject_name: String,
    pub sort_order: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentRef {
    pub id: String,
    pub admission_no: String,
    pub display_name: String,
    pub class_id: String,
    pub active: bool,
    pub sort_order: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssessmentDef {
    pub id: String,
    pub name: String,
    pub kind: AssessmentKind,
    pub class_subject_id: String,
    pub class_id: String,
    pub term_id: String,
    pub academic_year_id: Option<String>,
    pub strand_id: Option<String>,
    pub sort_order: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeRecord {
    pub id: String,
    pub student_id: String,
    pub assessment_def_id: String,
    pub numeric_value: Option<f64>,
    pub letter_grade: Option<String>,
    pub points: Option<i64>,
    pub competency_level: Option<CompetencyLevel>,
    pub remark: Option<String>,
    pub comment: Option<String>,
    pub version: i64,
    pub updated_at: String,
}

impl GradeRecord {
    fn same_payload(&self, o: &GradeOutcome) -> bool {
        self.numeric_value == o.numeric_value
            && self.letter_grade == o.letter_grade
            && self.points == o.points
            && self.competency_level == o.competency_level
            && self.remark == o.remark
            && self.comment == o.comment
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UpsertStatus {
    Created,
    Updated,
    Unchanged,
}

#[derive(Debug, Clone, Default)]
pub struct GradeFilter {
    pub assessment_def_id: Option<String>,
    pub student_id: Option<String>,
    pub class_subject_id: Option<String>,
    pub term_id: Option<String>,
}

fn placeholders(n: usize) -> String {
    std::iter::repeat_n("?", n).collect::<Vec<_>>().join(",")
}

pub fn load_class(conn: &Connection, class_id: &str) -> EngineResult<ClassInfo> {
    conn.query_row(
        "SELECT id, name, school_id FROM classes WHERE id = ?",
        [class_id],
        |r| {
            Ok(ClassInfo {
                id: r.get(0)?,
                name: r.get(1)?,
                school_id: r.get(2)?,
            })
        },
    )
    .optional()?
    .ok_or_else(|| EngineError::not_found("class", class_id))
}

pub fn load_term(conn: &Connection, term_id: &str) -> EngineResult<TermInfo> {
    conn.query_row(
        "SELECT id, name, academic_year_id FROM terms WHERE id = ?",
        [term_id],
        |r| {
            Ok(TermInfo {
                id: r.get(0)?,
                name: r.get(1)?,
                academic_year_id: r.get(2)?,
            })
        },
    )
    .optional()?
    .ok_or_else(|| EngineError::not_found("term", term_id))
}

const CLASS_SUBJECT_SELECT: &str = "SELECT cs.id, cs.class_id, cs.subject_id, s.code, s.name, cs.sort_order
     FROM class_subjects cs
     JOIN subjects s ON s.id = cs.subject_id";

fn class_subject_from_row(r: &Row<'_>) -> rusqlite::Result<ClassSubjectInfo> {
    Ok(ClassSubjectInfo {
        id: r.get(0)?,
        class_id: r.get(1)?,
        subject_id: r.get(2)?,
        subject_code: r.get(3)?,
        subject_name: r.get(4)?,
        sort_order: r.get(5)?,
    })
}

pub fn load_class_subject(conn: &Connection, id: &str) -> EngineResult<ClassSubjectInfo> {
    let sql = format!("{} WHERE cs.id = ?", CLASS_SUBJECT_SELECT);
    conn.query_row(&sql, [id], class_subject_from_row)
        .optional()?
        .ok_or_else(|| EngineError::not_found("class subject", id))
}

pub fn class_subjects(conn: &Connection, class_id: &str) -> EngineResult<Vec<ClassSubjectInfo>> {
    let sql = format!(
        "{} WHERE cs.class_id = ? ORDER BY cs.sort_order, s.name",
        CLASS_SUBJECT_SELECT
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([class_id], class_subject_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

const STUDENT_SELECT: &str =
    "SELECT id, admission_no, last_name, first_name, class_id, active, sort_order FROM students";

fn student_from_row(r: &Row<'_>) -> rusqlite::Result<StudentRef> {
    let last: String = r.get(2)?;
    let first: String = r.get(3)?;
    Ok(StudentRef {
        id: r.get(0)?,
        admission_no: r.get(1)?,
        display_name: format!("{}, {}", last, first),
        class_id: r.get(4)?,
        active: r.get::<_, i64>(5)? != 0,
        sort_order: r.get(6)?,
    })
}

pub fn load_student(conn: &Connection, student_id: &str) -> EngineResult<StudentRef> {
    let sql = format!("{} WHERE id = ?", STUDENT_SELECT);
    conn.query_row(&sql, [student_id], student_from_row)
        .optional()?
        .ok_or_else(|| EngineError::not_found("student", student_id))
}

/// Resolve an admission number (or a raw student id) to an active student
/// enrolled in `class_id`. Matching on admission number ignores surrounding
/// whitespace and ASCII case. Inactive students cannot be graded.
pub fn resolve_student(
    conn: &Connection,
    class_id: &str,
    identifier: &str,
) -> EngineResult<StudentRef> {
    let ident = identifier.trim();
    if ident.is_empty() {
        return Err(EngineError::validation("student identifier is empty"));
    }
    let sql = format!(
        "{} WHERE class_id = ?1 AND (admission_no = ?2 COLLATE NOCASE OR id = ?2)
         ORDER BY CASE WHEN admission_no = ?2 COLLATE NOCASE THEN 0 ELSE 1 END
         LIMIT 1",
        STUDENT_SELECT
    );
    let student = conn
        .query_row(&sql, (class_id, ident), student_from_row)
        .optional()?
        .ok_or_else(|| EngineError::not_found("student", ident))?;
    if !student.active {
        return Err(EngineError::validation(format!(
            "student '{}' is inactive",
            student.admission_no
        )));
    }
    Ok(student)
}

/// Active students of a class: the cohort for ranking and class averages.
pub fn active_students(conn: &Connection, class_id: &str) -> EngineResult<Vec<StudentRef>> {
    let sql = format!(
        "{} WHERE class_id = ? AND active = 1 ORDER BY sort_order, admission_no",
        STUDENT_SELECT
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([class_id], student_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

const ASSESSMENT_SELECT: &str = "SELECT a.id, a.name, a.kind, a.max_marks, a.class_subject_id, cs.class_id,
            a.term_id, a.academic_year_id, a.strand_id, a.sort_order
     FROM assessment_defs a
     JOIN class_subjects cs ON cs.id = a.class_subject_id";

type RawAssessment = (
    String,
    String,
    String,
    Option<f64>,
    String,
    String,
    String,
    Option<String>,
    Option<String>,
    i64,
);

fn raw_assessment(r: &Row<'_>) -> rusqlite::Result<RawAssessment> {
    Ok((
        r.get(0)?,
        r.get(1)?,
        r.get(2)?,
        r.get(3)?,
        r.get(4)?,
        r.get(5)?,
        r.get(6)?,
        r.get(7)?,
        r.get(8)?,
        r.get(9)?,
    ))
}

fn assessment_from_raw(raw: RawAssessment) -> EngineResult<AssessmentDef> {
    let (
        id,
        name,
        kind,
        max_marks,
        class_subject_id,
        class_id,
        term_id,
        academic_year_id,
        strand_id,
        sort_order,
    ) = raw;
    Ok(AssessmentDef {
        kind: AssessmentKind::from_db(&kind, max_marks)?,
        id,
        name,
        class_subject_id,
        class_id,
        term_id,
        academic_year_id,
        strand_id,
        sort_order,
    })
}

pub fn load_assessment_def(conn: &Connection, id: &str) -> EngineResult<AssessmentDef> {
    let sql = format!("{} WHERE a.id = ?", ASSESSMENT_SELECT);
    let raw = conn
        .query_row(&sql, [id], raw_assessment)
        .optional()?
        .ok_or_else(|| EngineError::not_found("assessment", id))?;
    assessment_from_raw(raw)
}

/// Assessments of a class in a term, optionally narrowed to one class subject.
pub fn assessments_for(
    conn: &Connection,
    class_id: &str,
    class_subject_id: Option<&str>,
    term_id: &str,
) -> EngineResult<Vec<AssessmentDef>> {
    let mut sql = format!("{} WHERE cs.class_id = ? AND a.term_id = ?", ASSESSMENT_SELECT);
    let mut binds: Vec<Value> = vec![
        Value::Text(class_id.to_string()),
        Value::Text(term_id.to_string()),
    ];
    if let Some(cs) = class_subject_id {
        sql.push_str(" AND a.class_subject_id = ?");
        binds.push(Value::Text(cs.to_string()));
    }
    sql.push_str(" ORDER BY a.sort_order, a.name");

    let mut stmt = conn.prepare(&sql)?;
    let raws = stmt
        .query_map(params_from_iter(binds), raw_assessment)?
        .collect::<Result<Vec<_>, _>>()?;
    raws.into_iter().map(assessment_from_raw).collect()
}

const GRADE_SELECT: &str = "SELECT g.id, g.student_id, g.assessment_def_id, g.numeric_value, g.letter_grade,
            g.points, g.competency_level, g.remark, g.comment, g.version, g.updated_at
     FROM grade_records g";

fn grade_from_row(r: &Row<'_>) -> rusqlite::Result<GradeRecord> {
    let level: Option<String> = r.get(6)?;
    Ok(GradeRecord {
        id: r.get(0)?,
        student_id: r.get(1)?,
        assessment_def_id: r.get(2)?,
        numeric_value: r.get(3)?,
        letter_grade: r.get(4)?,
        points: r.get(5)?,
        competency_level: level.as_deref().and_then(CompetencyLevel::parse),
        remark: r.get(7)?,
        comment: r.get(8)?,
        version: r.get(9)?,
        updated_at: r.get(10)?,
    })
}

pub fn get_grade(
    conn: &Connection,
    student_id: &str,
    assessment_def_id: &str,
) -> EngineResult<Option<GradeRecord>> {
    let sql = format!(
        "{} WHERE g.student_id = ? AND g.assessment_def_id = ?",
        GRADE_SELECT
    );
    Ok(conn
        .query_row(&sql, (student_id, assessment_def_id), grade_from_row)
        .optional()?)
}

/// Insert or overwrite the record for `(student_id, assessment_def_id)`.
///
/// Resubmitting an identical outcome is a no-op: `version` and
/// `updated_at` stay as they were. With `expected_version` set, the call
/// fails with [`EngineError::Conflict`] unless the stored version matches
/// (`0` meaning "no record yet").
pub fn upsert_grade(
    conn: &Connection,
    student_id: &str,
    assessment_def_id: &str,
    outcome: &GradeOutcome,
    expected_version: Option<i64>,
) -> EngineResult<(GradeRecord, UpsertStatus)> {
    let tx = conn.unchecked_transaction()?;
    let existing = get_grade(&tx, student_id, assessment_def_id)?;

    if let Some(expected) = expected_version {
        let actual = existing.as_ref().map(|r| r.version).unwrap_or(0);
        if actual != expected {
            return Err(EngineError::Conflict { expected, actual });
        }
    }
    if let Some(rec) = existing.as_ref() {
        if rec.same_payload(outcome) {
            return Ok((rec.clone(), UpsertStatus::Unchanged));
        }
    }

    let now = chrono::Utc::now().to_rfc3339();
    tx.execute(
        "INSERT INTO grade_records(
            id, student_id, assessment_def_id, numeric_value, letter_grade, points,
            competency_level, remark, comment, version, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, 1, ?)
         ON CONFLICT(student_id, assessment_def_id) DO UPDATE SET
           numeric_value = excluded.numeric_value,
           letter_grade = excluded.letter_grade,
           points = excluded.points,
           competency_level = excluded.competency_level,
           remark = excluded.remark,
           comment = excluded.comment,
           version = grade_records.version + 1,
           updated_at = excluded.updated_at",
        (
            Uuid::new_v4().to_string(),
            student_id,
            assessment_def_id,
            outcome.numeric_value,
            outcome.letter_grade.as_deref(),
            outcome.points,
            outcome.competency_level.map(|l| l.as_str()),
            outcome.remark.as_deref(),
            outcome.comment.as_deref(),
            &now,
        ),
    )?;
    let stored = get_grade(&tx, student_id, assessment_def_id)?
        .ok_or_else(|| EngineError::not_found("grade record", assessment_def_id))?;
    tx.commit()?;

    let status = if existing.is_some() {
        UpsertStatus::Updated
    } else {
        UpsertStatus::Created
    };
    Ok((stored, status))
}

pub fn query_grades(conn: &Connection, filter: &GradeFilter) -> EngineResult<Vec<GradeRecord>> {
    let mut sql = format!(
        "{} JOIN assessment_defs a ON a.id = g.assessment_def_id WHERE 1 = 1",
        GRADE_SELECT
    );
    let mut binds: Vec<Value> = Vec::new();
    let clauses = [
        ("g.assessment_def_id", &filter.assessment_def_id),
        ("g.student_id", &filter.student_id),
        ("a.class_subject_id", &filter.class_subject_id),
        ("a.term_id", &filter.term_id),
    ];
    for (column, value) in clauses {
        if let Some(v) = value {
            sql.push_str(&format!(" AND {} = ?", column));
            binds.push(Value::Text(v.clone()));
        }
    }
    sql.push_str(" ORDER BY a.sort_order, g.assessment_def_id, g.student_id");

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(binds), grade_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn grades_for_assessments(
    conn: &Connection,
    assessment_ids: &[String],
) -> EngineResult<Vec<GradeRecord>> {
    if assessment_ids.is_empty() {
        return Ok(Vec::new());
    }
    let sql = format!(
        "{} WHERE g.assessment_def_id IN ({}) ORDER BY g.assessment_def_id, g.student_id",
        GRADE_SELECT,
        placeholders(assessment_ids.len())
    );
    let binds: Vec<Value> = assessment_ids
        .iter()
        .map(|id| Value::Text(id.clone()))
        .collect();
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(binds), grade_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use crate::grading::{compute, GradeInput, GradeScale};

    fn setup() -> Connection {
        let c = conn();
        class(&c, "C1");
        class(&c, "C2");
        term(&c, "T1");
        student(&c, "C1", "S1", "STU-001", 0);
        student(&c, "C2", "S9", "STU-009", 0);
        subject(&c, "C1", "CS-MATH", "Math", 0);
        assessment(&c, "A1", "CS-MATH", "T1", "grade", Some(100.0));
        c
    }

    fn outcome(marks: f64) -> GradeOutcome {
        compute(
            &AssessmentKind::GradeBased { max_marks: 100.0 },
            &GradeInput::marks(marks),
            &GradeScale::standard(),
        )
        .expect("compute")
    }

    #[test]
    fn resolves_admission_number_within_class_only() {
        let c = setup();
        assert_eq!(resolve_student(&c, "C1", " stu-001 ").expect("resolve").id, "S1");
        assert_eq!(resolve_student(&c, "C1", "S1").expect("by id").id, "S1");
        let err = resolve_student(&c, "C1", "STU-009").unwrap_err();
        assert!(matches!(err, EngineError::NotFound { what: "student", .. }));
    }

    #[test]
    fn inactive_students_resolve_but_cannot_be_graded() {
        let c = setup();
        student(&c, "C1", "S2", "STU-002", 1);
        deactivate(&c, "S2");
        let err = resolve_student(&c, "C1", "STU-002").unwrap_err();
        assert!(matches!(err, EngineError::Validation(ref m) if m.contains("inactive")));
        let cohort: Vec<String> = active_students(&c, "C1")
            .expect("cohort")
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(cohort, vec!["S1".to_string()]);
    }

    #[test]
    fn upsert_never_duplicates_and_skips_identical_writes() {
        let c = setup();
        let (first, s1) = upsert_grade(&c, "S1", "A1", &outcome(70.0), None).expect("create");
        assert_eq!(s1, UpsertStatus::Created);
        assert_eq!(first.version, 1);

        let (again, s2) = upsert_grade(&c, "S1", "A1", &outcome(70.0), None).expect("same");
        assert_eq!(s2, UpsertStatus::Unchanged);
        assert_eq!(again, first);

        let (changed, s3) = upsert_grade(&c, "S1", "A1", &outcome(82.0), None).expect("update");
        assert_eq!(s3, UpsertStatus::Updated);
        assert_eq!(changed.id, first.id);
        assert_eq!(changed.version, 2);
        assert_eq!(changed.letter_grade.as_deref(), Some("A"));

        let all = query_grades(&c, &GradeFilter::default()).expect("query");
        assert_eq!(all.len(), 1);
    }

    #[test]
    fn version_check_rejects_stale_writes() {
        let c = setup();
        let err = upsert_grade(&c, "S1", "A1", &outcome(50.0), Some(3)).unwrap_err();
        assert!(matches!(err, EngineError::Conflict { expected: 3, actual: 0 }));
        assert!(get_grade(&c, "S1", "A1").expect("get").is_none());

        upsert_grade(&c, "S1", "A1", &outcome(50.0), Some(0)).expect("create");
        let err = upsert_grade(&c, "S1", "A1", &outcome(60.0), Some(0)).unwrap_err();
        assert!(matches!(err, EngineError::Conflict { expected: 0, actual: 1 }));
        let (rec, _) = upsert_grade(&c, "S1", "A1", &outcome(60.0), Some(1)).expect("update");
        assert_eq!(rec.numeric_value, Some(60.0));
    }

    #[test]
    fn grade_based_without_max_marks_loads_as_zero() {
        let c = setup();
        assessment(&c, "A-BROKEN", "CS-MATH", "T1", "grade", None);
        let def = load_assessment_def(&c, "A-BROKEN").expect("load");
        assert_eq!(def.kind.max_marks(), Some(0.0));
        assert_eq!(def.class_id, "C1");
        assert!(matches!(
            load_assessment_def(&c, "nope"),
            Err(EngineError::NotFound { what: "assessment", .. })
        ));
    }

    #[test]
    fn query_filters_by_term_and_subject() {
        let c = setup();
        term(&c, "T2");
        assessment(&c, "A2", "CS-MATH", "T2", "grade", Some(50.0));
        upsert_grade(&c, "S1", "A1", &outcome(40.0), None).expect("a1");
        upsert_grade(&c, "S1", "A2", &outcome(40.0), None).expect("a2");

        let t1 = query_grades(
            &c,
            &GradeFilter {
                term_id: Some("T1".into()),
                ..GradeFilter::default()
            },
        )
        .expect("query");
        assert_eq!(t1.len(), 1);
        assert_eq!(t1[0].assessment_def_id, "A1");

        let by_subject = query_grades(
            &c,
            &GradeFilter {
                class_subject_id: Some("CS-MATH".into()),
                student_id: Some("S1".into()),
                ..GradeFilter::default()
            },
        )
        .expect("query");
        assert_eq!(by_subject.len(), 2);
    }
}
