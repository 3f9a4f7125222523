//! Grade ingestion: single entries, JSON batches and CSV uploads.
//!
//! Every batch row is reduced to a `Result` of its own. Row failures land in
//! `BatchResult::errors`; only structural problems (unknown assessment, bad
//! configuration, unreadable CSV, oversized batch) fail the whole call.

use crate::config::{self, GradingConfig};
use crate::error::{EngineError, EngineResult};
use crate::grading::{self, AssessmentKind, CompetencyLevel, GradeInput, GradeValue};
use crate::store::{self, AssessmentDef, GradeRecord, UpsertStatus};
use rusqlite::Connection;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

pub const MAX_BATCH_ROWS: usize = 5000;

/// The value cell of a row before it is interpreted for an assessment kind.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Number(f64),
    Text(String),
    Blank,
}

impl CellValue {
    fn from_text(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            None | Some("") => CellValue::Blank,
            Some(t) => CellValue::Text(t.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchRow {
    /// Zero-based position among the data rows of the batch.
    pub row_index: usize,
    /// One-based line in the uploaded file, for CSV input.
    pub line: Option<usize>,
    pub student_identifier: String,
    pub value: CellValue,
    pub comment: Option<String>,
    pub remark: Option<String>,
    /// Set when the row was unusable before grading started.
    pub rejected: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RowError {
    pub row_index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    pub student_identifier: String,
    pub code: String,
    pub reason: String,
}

impl RowError {
    fn new(row: &BatchRow, e: &EngineError) -> Self {
        Self {
            row_index: row.row_index,
            line: row.line,
            student_identifier: row.student_identifier.clone(),
            code: match e {
                EngineError::Store(_) => "db_write_failed".to_string(),
                _ => e.code().to_string(),
            },
            reason: e.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResult {
    pub assessment_def_id: String,
    pub successful_count: usize,
    pub failed_count: usize,
    pub created_count: usize,
    pub updated_count: usize,
    pub unchanged_count: usize,
    pub records: Vec<GradeRecord>,
    pub errors: Vec<RowError>,
}

/// Turn a raw cell into grading input for the given assessment kind.
fn interpret(
    kind: &AssessmentKind,
    value: &CellValue,
    comment: Option<String>,
    remark: Option<String>,
) -> EngineResult<GradeInput> {
    let value = match (kind, value) {
        (AssessmentKind::GradeBased { .. }, CellValue::Number(n)) => GradeValue::Marks(*n),
        (AssessmentKind::GradeBased { .. }, CellValue::Text(t)) => match t.parse::<f64>() {
            Ok(n) => GradeValue::Marks(n),
            Err(_) => {
                return Err(EngineError::validation(format!(
                    "marks '{}' is not a number",
                    t
                )))
            }
        },
        (AssessmentKind::GradeBased { .. }, CellValue::Blank) => {
            return Err(EngineError::validation("marks are required"))
        }
        (AssessmentKind::CompetencyBased, CellValue::Text(t)) => {
            match CompetencyLevel::parse(t) {
                Some(level) => GradeValue::Competency(level),
                None => {
                    return Err(EngineError::validation(format!(
                        "unknown competency level '{}'",
                        t
                    )))
                }
            }
        }
        (AssessmentKind::CompetencyBased, CellValue::Number(_)) => {
            return Err(EngineError::validation(
                "competency-based assessment expects a competency level, not marks",
            ))
        }
        (AssessmentKind::CompetencyBased, CellValue::Blank) => {
            return Err(EngineError::validation("competency level is required"))
        }
        (AssessmentKind::Holistic, CellValue::Blank) => GradeValue::Unscored,
        (AssessmentKind::Holistic, _) => {
            return Err(EngineError::validation(
                "holistic assessment takes a comment only, not marks or levels",
            ))
        }
    };
    Ok(GradeInput {
        value,
        comment,
        remark,
    })
}

/// Configuration problems block grading for the whole assessment.
fn preflight(def: &AssessmentDef) -> EngineResult<()> {
    if let AssessmentKind::GradeBased { max_marks } = def.kind {
        if !max_marks.is_finite() || max_marks <= 0.0 {
            return Err(EngineError::configuration(format!(
                "assessment '{}' is grade-based but has no usable maxMarks",
                def.id
            )));
        }
    }
    Ok(())
}

fn process_row(
    conn: &Connection,
    def: &AssessmentDef,
    cfg: &GradingConfig,
    row: &BatchRow,
) -> EngineResult<(GradeRecord, UpsertStatus)> {
    if let Some(reason) = &row.rejected {
        return Err(EngineError::validation(reason.clone()));
    }
    let student = store::resolve_student(conn, &def.class_id, &row.student_identifier)?;
    let input = interpret(&def.kind, &row.value, row.comment.clone(), row.remark.clone())?;
    let outcome = grading::compute(&def.kind, &input, &cfg.scale)?;
    store::upsert_grade(conn, &student.id, &def.id, &outcome, None)
}

/// Grade and store each row independently, in input order.
pub fn ingest_batch(
    conn: &Connection,
    assessment_def_id: &str,
    rows: &[BatchRow],
) -> EngineResult<BatchResult> {
    if rows.len() > MAX_BATCH_ROWS {
        return Err(EngineError::Malformed(format!(
            "batch exceeds max rows: {} > {}",
            rows.len(),
            MAX_BATCH_ROWS
        )));
    }
    let def = store::load_assessment_def(conn, assessment_def_id)?;
    preflight(&def)?;
    let cfg = config::load_for_class(conn, &def.class_id)?;

    let mut result = BatchResult {
        assessment_def_id: def.id.clone(),
        successful_count: 0,
        failed_count: 0,
        created_count: 0,
        updated_count: 0,
        unchanged_count: 0,
        records: Vec::new(),
        errors: Vec::new(),
    };

    for row in rows {
        match process_row(conn, &def, &cfg, row) {
            Ok((record, status)) => {
                result.successful_count += 1;
                match status {
                    UpsertStatus::Created => result.created_count += 1,
                    UpsertStatus::Updated => result.updated_count += 1,
                    UpsertStatus::Unchanged => result.unchanged_count += 1,
                }
                result.records.push(record);
            }
            Err(e) => {
                if matches!(e, EngineError::Store(_)) {
                    warn!(row = row.row_index, error = %e, "grade row hit a store error");
                } else {
                    debug!(row = row.row_index, error = %e, "grade row rejected");
                }
                result.failed_count += 1;
                result.errors.push(RowError::new(row, &e));
            }
        }
    }

    info!(
        assessment = %def.id,
        rows = rows.len(),
        ok = result.successful_count,
        failed = result.failed_count,
        "grade batch ingested"
    );
    Ok(result)
}

/// Single-entry grading; every failure goes straight back to the caller.
pub fn upsert_single(
    conn: &Connection,
    assessment_def_id: &str,
    student_id: &str,
    input: &GradeInput,
    expected_version: Option<i64>,
) -> EngineResult<(GradeRecord, UpsertStatus)> {
    let def = store::load_assessment_def(conn, assessment_def_id)?;
    grade_single(conn, &def, student_id, input, expected_version)
}

/// [`upsert_single`] for a definition the caller already loaded.
pub fn grade_single(
    conn: &Connection,
    def: &AssessmentDef,
    student_id: &str,
    input: &GradeInput,
    expected_version: Option<i64>,
) -> EngineResult<(GradeRecord, UpsertStatus)> {
    preflight(def)?;
    let cfg = config::load_for_class(conn, &def.class_id)?;
    let student = store::resolve_student(conn, &def.class_id, student_id)?;
    let outcome = grading::compute(&def.kind, input, &cfg.scale)?;
    let (record, status) =
        store::upsert_grade(conn, &student.id, &def.id, &outcome, expected_version)?;
    debug!(assessment = %def.id, student = %student.id, ?status, "grade upserted");
    Ok((record, status))
}

/// Grading input from a JSON value object (`marks`, `competencyLevel`,
/// `comment`, `remark`).
pub fn input_from_json(kind: &AssessmentKind, obj: &Value) -> EngineResult<GradeInput> {
    let cell = value_cell(obj);
    interpret(kind, &cell, opt_string(obj, "comment"), opt_string(obj, "remark"))
}

fn opt_string(obj: &Value, key: &str) -> Option<String> {
    obj.get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn value_cell(obj: &Value) -> CellValue {
    match obj.get("marks") {
        Some(Value::Number(n)) => return n.as_f64().map(CellValue::Number).unwrap_or(CellValue::Blank),
        Some(Value::String(s)) if !s.trim().is_empty() => return CellValue::Text(s.trim().to_string()),
        Some(Value::Null) | None => {}
        Some(other) => return CellValue::Text(other.to_string()),
    }
    CellValue::from_text(obj.get("competencyLevel").and_then(|v| v.as_str()))
}

/// Batch rows from JSON entries. Entries that are not objects become
/// rejected rows rather than failing the batch.
pub fn rows_from_entries(entries: &[Value]) -> Vec<BatchRow> {
    entries
        .iter()
        .enumerate()
        .map(|(i, entry)| {
            if !entry.is_object() {
                return BatchRow {
                    row_index: i,
                    line: None,
                    student_identifier: String::new(),
                    value: CellValue::Blank,
                    comment: None,
                    remark: None,
                    rejected: Some(format!("entry at index {} must be an object", i)),
                };
            }
            let identifier = ["studentIdentifier", "admissionNo", "studentId"]
                .iter()
                .find_map(|k| opt_string(entry, k))
                .unwrap_or_default();
            BatchRow {
                row_index: i,
                line: None,
                student_identifier: identifier,
                value: value_cell(entry),
                comment: opt_string(entry, "comment"),
                remark: opt_string(entry, "remark"),
                rejected: None,
            }
        })
        .collect()
}

fn normalize_header(h: &str) -> String {
    h.trim_start_matches('\u{feff}')
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-' && *c != '_')
        .collect::<String>()
        .to_ascii_lowercase()
}

struct CsvColumns {
    admission_no: usize,
    marks: usize,
    comment: Option<usize>,
    remark: Option<usize>,
}

fn locate_columns(headers: &csv::StringRecord) -> EngineResult<CsvColumns> {
    let mut admission_no = None;
    let mut marks = None;
    let mut comment = None;
    let mut remark = None;
    for (i, h) in headers.iter().enumerate() {
        let slot = match normalize_header(h).as_str() {
            "admissionno" | "admissionnumber" => &mut admission_no,
            "marks" => &mut marks,
            "comment" | "comments" => &mut comment,
            "remark" => &mut remark,
            _ => continue,
        };
        if slot.is_none() {
            *slot = Some(i);
        }
    }
    let (Some(admission_no), Some(marks)) = (admission_no, marks) else {
        let found = headers.iter().collect::<Vec<_>>().join(",");
        return Err(EngineError::Malformed(format!(
            "CSV header must contain admission-no and marks columns, found: {}",
            found
        )));
    };
    Ok(CsvColumns {
        admission_no,
        marks,
        comment,
        remark,
    })
}

/// Parse an upload into batch rows. Header problems and unreadable records
/// are fatal; everything about individual values is left to grading.
pub fn parse_csv(text: &str) -> EngineResult<Vec<BatchRow>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let headers = rdr
        .headers()
        .map_err(|e| EngineError::Malformed(format!("unreadable CSV header: {}", e)))?
        .clone();
    if headers.iter().all(|h| h.trim().is_empty()) {
        return Err(EngineError::Malformed("CSV input is empty".to_string()));
    }
    let cols = locate_columns(&headers)?;

    let mut rows = Vec::new();
    for record in rdr.records() {
        let record = record.map_err(|e| EngineError::Malformed(format!("unreadable CSV: {}", e)))?;
        if record.iter().all(|f| f.is_empty()) {
            continue;
        }
        let field = |i: usize| record.get(i).filter(|s| !s.is_empty()).map(str::to_string);
        rows.push(BatchRow {
            row_index: rows.len(),
            line: record.position().map(|p| p.line() as usize),
            student_identifier: field(cols.admission_no).unwrap_or_default(),
            value: CellValue::from_text(record.get(cols.marks)),
            comment: cols.comment.and_then(field),
            remark: cols.remark.and_then(field),
            rejected: None,
        });
    }
    Ok(rows)
}

pub fn ingest_csv(conn: &Connection, assessment_def_id: &str, text: &str) -> EngineResult<BatchResult> {
    let rows = parse_csv(text)?;
    ingest_batch(conn, assessment_def_id, &rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::fixtures::*;
    use serde_json::json;

    fn setup() -> Connection {
        let c = conn();
        class(&c, "C1");
        term(&c, "T1");
        for i in 1..=4 {
            student(&c, "C1", &format!("S{}", i), &format!("STU-00{}", i), i);
        }
        subject(&c, "C1", "CS-MATH", "Math", 0);
        assessment(&c, "A1", "CS-MATH", "T1", "grade", Some(100.0));
        assessment(&c, "A-COMP", "CS-MATH", "T1", "competency", None);
        c
    }

    #[test]
    fn csv_headers_match_loosely() {
        let rows = parse_csv("\u{feff} Admission No ,MARKS, Comment\nSTU-001, 85 ,Good work\n")
            .expect("parse");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].student_identifier, "STU-001");
        assert_eq!(rows[0].value, CellValue::Text("85".into()));
        assert_eq!(rows[0].comment.as_deref(), Some("Good work"));
        assert_eq!(rows[0].line, Some(2));
    }

    #[test]
    fn csv_missing_required_column_is_fatal() {
        let err = parse_csv("admission-no,comment\nSTU-001,hi\n").unwrap_err();
        assert!(matches!(err, EngineError::Malformed(_)));
        assert!(matches!(parse_csv(""), Err(EngineError::Malformed(_))));
    }

    #[test]
    fn csv_skips_blank_rows_and_tolerates_short_rows() {
        let rows = parse_csv("admission-no,marks,comment\n\nSTU-001\n,,\nSTU-002,40\n").expect("parse");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].value, CellValue::Blank);
        assert_eq!(rows[1].row_index, 1);
        assert_eq!(rows[1].line, Some(5));
    }

    #[test]
    fn out_of_range_row_fails_and_rest_continue() {
        let c = setup();
        let csv = "admission-no,marks,comment\nSTU-001,105,\nSTU-002,64,\nSTU-003,abc,\n";
        let result = ingest_csv(&c, "A1", csv).expect("ingest");
        assert_eq!(result.successful_count, 1);
        assert_eq!(result.failed_count, 2);
        assert_eq!(result.errors[0].row_index, 0);
        assert_eq!(result.errors[0].code, "bad_params");
        assert!(result.errors[0].reason.contains("out of range"));
        assert_eq!(result.errors[1].row_index, 2);
        assert!(result.errors[1].reason.contains("not a number"));
        assert_eq!(result.records[0].letter_grade.as_deref(), Some("B-"));
    }

    #[test]
    fn unresolved_student_is_one_error_at_its_index() {
        let c = setup();
        let entries = vec![
            json!({ "studentIdentifier": "STU-001", "marks": 70 }),
            json!({ "studentIdentifier": "STU-404", "marks": 70 }),
            json!({ "studentIdentifier": "STU-003", "marks": 70 }),
            json!({ "studentIdentifier": "STU-004", "marks": 70 }),
        ];
        let result = ingest_batch(&c, "A1", &rows_from_entries(&entries)).expect("ingest");
        assert_eq!(result.successful_count, 3);
        assert_eq!(result.failed_count, 1);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].row_index, 1);
        assert_eq!(result.errors[0].code, "not_found");
        assert_eq!(result.errors[0].student_identifier, "STU-404");
    }

    #[test]
    fn resubmitting_is_idempotent() {
        let c = setup();
        let csv = "admission-no,marks\nSTU-001,50\nSTU-002,60\nSTU-404,10\n";
        let first = ingest_csv(&c, "A1", csv).expect("first");
        let second = ingest_csv(&c, "A1", csv).expect("second");
        assert_eq!(first.successful_count, second.successful_count);
        assert_eq!(first.failed_count, second.failed_count);
        assert_eq!(first.created_count, 2);
        assert_eq!(second.unchanged_count, 2);
        assert_eq!(first.records, second.records);
        let n: i64 = c
            .query_row("SELECT COUNT(*) FROM grade_records", [], |r| r.get(0))
            .expect("count");
        assert_eq!(n, 2);
    }

    #[test]
    fn unknown_assessment_and_oversized_batches_are_fatal() {
        let c = setup();
        assert!(matches!(
            ingest_batch(&c, "nope", &[]),
            Err(EngineError::NotFound { .. })
        ));
        let rows = rows_from_entries(&vec![json!({}); MAX_BATCH_ROWS + 1]);
        assert!(matches!(
            ingest_batch(&c, "A1", &rows),
            Err(EngineError::Malformed(_))
        ));
    }

    #[test]
    fn missing_max_marks_blocks_the_batch() {
        let c = setup();
        assessment(&c, "A-BROKEN", "CS-MATH", "T1", "grade", None);
        let rows = rows_from_entries(&[json!({ "studentIdentifier": "STU-001", "marks": 5 })]);
        assert!(matches!(
            ingest_batch(&c, "A-BROKEN", &rows),
            Err(EngineError::Configuration(_))
        ));
    }

    #[test]
    fn competency_rows_accept_levels_and_reject_marks() {
        let c = setup();
        let csv = "admission-no,marks\nSTU-001,EE\nSTU-002,72\nSTU-003,meeting\n";
        let result = ingest_csv(&c, "A-COMP", csv).expect("ingest");
        assert_eq!(result.successful_count, 2);
        assert_eq!(result.errors[0].row_index, 1);
        assert_eq!(
            result.records[0].competency_level,
            Some(CompetencyLevel::Exceeding)
        );
        assert_eq!(
            result.records[1].remark.as_deref(),
            Some("Meeting expectations")
        );
    }

    #[test]
    fn counts_always_cover_every_row() {
        let c = setup();
        let entries = vec![
            json!("not an object"),
            json!({ "admissionNo": "STU-001", "marks": -4 }),
            json!({ "admissionNo": "STU-002" }),
            json!({ "studentId": "S3", "marks": "77.5" }),
        ];
        let result = ingest_batch(&c, "A1", &rows_from_entries(&entries)).expect("ingest");
        assert_eq!(result.successful_count + result.failed_count, entries.len());
        assert_eq!(result.successful_count, 1);
        let idx: Vec<usize> = result.errors.iter().map(|e| e.row_index).collect();
        assert_eq!(idx, vec![0, 1, 2]);
    }

    #[test]
    fn single_entry_surfaces_errors_directly() {
        let c = setup();
        let err = upsert_single(&c, "A1", "S1", &GradeInput::marks(101.0), None).unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
        let err = upsert_single(&c, "missing", "S1", &GradeInput::marks(1.0), None).unwrap_err();
        assert!(matches!(err, EngineError::NotFound { what: "assessment", .. }));
        let (rec, status) =
            upsert_single(&c, "A1", "S1", &GradeInput::marks(85.0), None).expect("ok");
        assert_eq!(status, UpsertStatus::Created);
        assert_eq!(rec.letter_grade.as_deref(), Some("A"));
        assert_eq!(rec.points, Some(12));
        assert_eq!(rec.remark.as_deref(), Some("Excellent"));
    }

    #[test]
    fn grade_single_reuses_a_loaded_definition() {
        let c = setup();
        let def = store::load_assessment_def(&c, "A1").expect("def");
        let (rec, status) =
            grade_single(&c, &def, "S2", &GradeInput::marks(40.0), Some(0)).expect("create");
        assert_eq!(status, UpsertStatus::Created);
        assert_eq!(rec.version, 1);
        let err = grade_single(&c, &def, "S2", &GradeInput::marks(45.0), Some(0)).unwrap_err();
        assert!(matches!(err, EngineError::Conflict { expected: 0, actual: 1 }));
    }

    #[test]
    fn inactive_students_fail_their_own_row() {
        let c = setup();
        deactivate(&c, "S4");
        let entries = vec![
            json!({ "admissionNo": "STU-001", "marks": 50 }),
            json!({ "admissionNo": "STU-004", "marks": 60 }),
        ];
        let result = ingest_batch(&c, "A1", &rows_from_entries(&entries)).expect("ingest");
        assert_eq!(result.successful_count, 1);
        assert_eq!(result.errors[0].row_index, 1);
        assert_eq!(result.errors[0].code, "bad_params");
        assert!(result.errors[0].reason.contains("inactive"));
    }
}
