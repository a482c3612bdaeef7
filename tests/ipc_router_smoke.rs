mod common;

use common::Sidecar;
use serde_json::json;

#[test]
fn every_method_is_routed() {
    let workspace = tempfile::tempdir().expect("workspace");
    let mut sidecar = Sidecar::spawn_in(workspace.path());
    let bundle = workspace.path().join("smoke.zip");

    let methods = [
        "health",
        "setup.get",
        "setup.update",
        "users.create",
        "users.get",
        "users.getByEmail",
        "users.getByAccount",
        "users.setRole",
        "users.markEmailVerified",
        "users.delete",
        "accounts.link",
        "accounts.unlink",
        "accounts.list",
        "sessions.create",
        "sessions.get",
        "sessions.updateExpiry",
        "sessions.delete",
        "sessions.purgeExpired",
        "verificationTokens.issue",
        "verificationTokens.consume",
        "classes.create",
        "classes.get",
        "classes.delete",
        "classes.listFor",
        "classes.roster",
        "students.enroll",
        "students.unenroll",
        "essays.submit",
        "essays.get",
        "essays.update",
        "essays.delete",
        "essays.listByAuthor",
        "essays.listByClass",
        "feedback.request",
        "backup.exportWorkspaceBundle",
    ];
    for method in methods {
        let resp = sidecar.request(method, json!({ "outPath": bundle.to_string_lossy() }));
        let code = resp.pointer("/error/code").and_then(|v| v.as_str());
        assert_ne!(code, Some("not_implemented"), "{} not routed", method);
    }

    assert_eq!(sidecar.err_code("essays.grade", json!({})), "not_implemented");
}

#[test]
fn requests_before_workspace_selection_are_rejected() {
    let mut sidecar = Sidecar::spawn();
    let health = sidecar.ok("health", json!({}));
    assert!(health.get("workspacePath").map(|v| v.is_null()).unwrap_or(false));
    assert_eq!(
        sidecar.err_code("users.get", json!({ "userId": "u1" })),
        "no_workspace"
    );
    assert_eq!(sidecar.err_code("setup.get", json!({})), "no_workspace");
}

#[test]
fn malformed_lines_get_bad_json_and_the_loop_continues() {
    let mut sidecar = Sidecar::spawn();
    let resp = sidecar.write_raw("{not json");
    assert_eq!(
        resp.pointer("/error/code").and_then(|v| v.as_str()),
        Some("bad_json")
    );
    let health = sidecar.ok("health", json!({}));
    assert!(health.get("version").is_some());
}

#[test]
fn missing_params_map_to_bad_params() {
    let workspace = tempfile::tempdir().expect("workspace");
    let mut sidecar = Sidecar::spawn_in(workspace.path());
    assert_eq!(sidecar.err_code("users.create", json!({})), "bad_params");
    assert_eq!(
        sidecar.err_code(
            "sessions.create",
            json!({ "userId": "u", "sessionToken": "t", "expires": "tomorrow" })
        ),
        "bad_params"
    );
    assert_eq!(
        sidecar.err_code("feedback.request", json!({ "essayId": "e", "rescore": "yes" })),
        "bad_params"
    );
}
