mod test_support;

use serde_json::json;
use test_support::{request, request_err, request_ok, seed_workspace, spawn_sidecar, temp_dir};

#[test]
fn school_override_changes_grading_and_bad_scales_are_rejected() {
    let workspace = temp_dir("gradebook-config-override");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    seed_workspace(&mut stdin, &mut reader, &workspace);

    let defaults = request_ok(&mut stdin, &mut reader, "1", "grading.config.get", json!({}));
    assert_eq!(defaults["config"]["passThreshold"], json!(50.0));
    assert_eq!(defaults["config"]["scale"].as_array().map(|a| a.len()), Some(12));

    let gapped = request_err(
        &mut stdin,
        &mut reader,
        "2",
        "grading.config.update",
        json!({
            "schoolId": "SCH-1",
            "patch": { "scale": [
                { "minPercent": 0, "maxPercent": 40, "letter": "F", "points": 0, "remark": "Fail" },
                { "minPercent": 50, "maxPercent": 100, "letter": "P", "points": 1, "remark": "Pass" }
            ] }
        }),
    );
    assert_eq!(gapped, "config_invalid");

    let updated = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "grading.config.update",
        json!({
            "schoolId": "SCH-1",
            "patch": {
                "passThreshold": 60,
                "scale": [
                    { "minPercent": 0, "maxPercent": 50, "letter": "F", "points": 0, "remark": "Fail" },
                    { "minPercent": 50, "maxPercent": 100, "letter": "P", "points": 1, "remark": "Pass" }
                ]
            }
        }),
    );
    assert_eq!(updated["config"]["passThreshold"], json!(60.0));

    let graded = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "grades.upsert",
        json!({ "assessmentDefId": "MATH-CAT", "studentId": "S1", "marks": 55 }),
    );
    assert_eq!(graded["record"]["letterGrade"], json!("P"));
    assert_eq!(graded["record"]["remark"], json!("Pass"));

    let stats = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "stats.subject",
        json!({ "classSubjectId": "CS-MATH", "termId": "T1" }),
    );
    assert_eq!(stats["passRate"], json!(0.0));

    let school = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "grading.config.get",
        json!({ "schoolId": "SCH-1" }),
    );
    assert_eq!(school["config"]["passThreshold"], json!(60.0));
    let global = request_ok(&mut stdin, &mut reader, "7", "grading.config.get", json!({}));
    assert_eq!(global["config"]["passThreshold"], json!(50.0));

    let unknown = request(
        &mut stdin,
        &mut reader,
        "8",
        "grading.config.update",
        json!({ "patch": { "topPerformers": 0 } }),
    );
    assert_eq!(unknown["error"]["code"], json!("config_invalid"));
}
