mod common;

use common::{create_user, str_at, Sidecar};
use serde_json::json;

fn configure_scorer(sidecar: &mut Sidecar, script: &str) {
    sidecar.ok(
        "setup.update",
        json!({
            "section": "scoring",
            "patch": { "command": "sh", "args": ["-c", script], "timeoutMs": 5000 }
        }),
    );
}

fn submit(sidecar: &mut Sidecar, author: &str, class_id: Option<&str>) -> String {
    let result = sidecar.ok(
        "essays.submit",
        json!({
            "authorId": author,
            "classId": class_id,
            "title": "  The Tide  ",
            "content": "The tide comes in twice a day.",
            "prompt": "Describe a natural cycle."
        }),
    );
    assert_eq!(str_at(&result, "/essay/title"), "The Tide");
    str_at(&result, "/essay/id").to_string()
}

#[test]
fn unconfigured_scorer_leaves_essay_submitted() {
    let workspace = tempfile::tempdir().expect("workspace");
    let mut sidecar = Sidecar::spawn_in(workspace.path());
    let author = create_user(&mut sidecar, "w@example.com", "STUDENT");
    let essay_id = submit(&mut sidecar, &author, None);

    assert_eq!(
        sidecar.err_code("feedback.request", json!({ "essayId": essay_id })),
        "scoring_failed"
    );
    let view = sidecar.ok("essays.get", json!({ "essayId": essay_id }));
    assert_eq!(str_at(&view, "/state"), "submitted");
    assert!(view["feedback"].is_null());
}

#[test]
fn submit_validates_text_and_references() {
    let workspace = tempfile::tempdir().expect("workspace");
    let mut sidecar = Sidecar::spawn_in(workspace.path());
    let author = create_user(&mut sidecar, "w@example.com", "STUDENT");

    let blank = sidecar.request(
        "essays.submit",
        json!({ "authorId": author, "title": "   ", "content": "x", "prompt": "y" }),
    );
    assert_eq!(str_at(&blank, "/error/code"), "validation_failed");

    sidecar.ok(
        "setup.update",
        json!({ "section": "essays", "patch": { "maxTitleChars": 5 } }),
    );
    assert_eq!(
        sidecar.err_code(
            "essays.submit",
            json!({ "authorId": author, "title": "Too long a title", "content": "x", "prompt": "y" })
        ),
        "validation_failed"
    );
    assert_eq!(
        sidecar.err_code(
            "essays.submit",
            json!({ "authorId": "ghost", "title": "Hi", "content": "x", "prompt": "y" })
        ),
        "not_found"
    );
    assert_eq!(
        sidecar.err_code(
            "essays.submit",
            json!({ "authorId": author, "classId": "ghost", "title": "Hi", "content": "x", "prompt": "y" })
        ),
        "not_found"
    );
}

#[cfg(unix)]
#[test]
fn scored_essay_reaches_feedback_ready_and_rescore_replaces_it() {
    let workspace = tempfile::tempdir().expect("workspace");
    let mut sidecar = Sidecar::spawn_in(workspace.path());
    let teacher = create_user(&mut sidecar, "t@example.com", "TEACHER");
    let student = create_user(&mut sidecar, "s@example.com", "STUDENT");
    let class = sidecar.ok("classes.create", json!({ "teacherId": teacher, "name": "Composition" }));
    let class_id = str_at(&class, "/class/id").to_string();
    sidecar.ok("students.enroll", json!({ "userId": student, "classId": class_id }));
    let essay_id = submit(&mut sidecar, &student, Some(&class_id));

    configure_scorer(
        &mut sidecar,
        r#"cat >/dev/null; echo '{"contentScore":70,"languageScore":80,"organizationScore":90,"feedback":"Clear cycle."}'"#,
    );
    let first = sidecar.ok("feedback.request", json!({ "essayId": essay_id }));
    assert_eq!(first["feedback"]["totalScore"], json!(80));
    assert_eq!(str_at(&first, "/feedback/feedback"), "Clear cycle.");
    let feedback_id = str_at(&first, "/feedback/id").to_string();

    let view = sidecar.ok("essays.get", json!({ "essayId": essay_id }));
    assert_eq!(str_at(&view, "/state"), "feedbackReady");
    assert!(view["essay"]["scoringStartedAt"].is_null());

    configure_scorer(
        &mut sidecar,
        r#"cat >/dev/null; echo '{"contentScore":91,"languageScore":90,"organizationScore":90,"feedback":"Sharper."}'"#,
    );
    let unchanged = sidecar.ok("feedback.request", json!({ "essayId": essay_id }));
    assert_eq!(unchanged["feedback"]["totalScore"], json!(80));

    let rescored = sidecar.ok(
        "feedback.request",
        json!({ "essayId": essay_id, "rescore": true }),
    );
    assert_eq!(rescored["feedback"]["totalScore"], json!(90));
    assert_eq!(str_at(&rescored, "/feedback/id"), feedback_id);

    let listed = sidecar.ok("essays.listByClass", json!({ "classId": class_id }));
    assert_eq!(listed["essays"].as_array().map(|a| a.len()), Some(1));

    let updated = sidecar.ok(
        "essays.update",
        json!({ "essayId": essay_id, "title": "The Tides", "imageUrl": null }),
    );
    assert_eq!(str_at(&updated, "/essay/title"), "The Tides");
    let view = sidecar.ok("essays.get", json!({ "essayId": essay_id }));
    assert_eq!(view["feedback"]["totalScore"], json!(90));

    let deleted = sidecar.ok("essays.delete", json!({ "essayId": essay_id }));
    assert_eq!(deleted["deleted"], json!(true));
    assert_eq!(
        sidecar.err_code("essays.get", json!({ "essayId": essay_id })),
        "not_found"
    );
}

#[cfg(unix)]
#[test]
fn out_of_range_scores_are_rejected() {
    let workspace = tempfile::tempdir().expect("workspace");
    let mut sidecar = Sidecar::spawn_in(workspace.path());
    let author = create_user(&mut sidecar, "w@example.com", "STUDENT");
    let essay_id = submit(&mut sidecar, &author, None);

    configure_scorer(
        &mut sidecar,
        r#"cat >/dev/null; echo '{"contentScore":101,"languageScore":80,"organizationScore":90,"feedback":"?"}'"#,
    );
    assert_eq!(
        sidecar.err_code("feedback.request", json!({ "essayId": essay_id })),
        "scoring_failed"
    );
    let view = sidecar.ok("essays.get", json!({ "essayId": essay_id }));
    assert_eq!(str_at(&view, "/state"), "submitted");
}
