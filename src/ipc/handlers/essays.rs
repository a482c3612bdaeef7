use crate::essays::{self, EssayPatch, NewEssay};
use crate::feedback;
use crate::ipc::error::{core_err, err, ok};
use crate::ipc::helpers::{
    optional_bool, optional_str, required_str, respond, with_conn, Handler, ParamResult,
};
use crate::ipc::types::{AppState, Request};
use crate::scoring::{CommandScorer, ScoreBounds};
use crate::setup;
use rusqlite::Connection;
use serde_json::Value;

fn settings_failed(req: &Request, e: anyhow::Error) -> Value {
    tracing::error!(request_id = %req.id, error = %e, "failed to load workspace settings");
    err(&req.id, "db_failed", e.to_string(), None)
}

fn handle_essays_submit(conn: &Connection, req: &Request) -> ParamResult<Value> {
    let new = NewEssay {
        author_id: required_str(req, "authorId")?,
        title: required_str(req, "title")?,
        content: required_str(req, "content")?,
        prompt: required_str(req, "prompt")?,
        image_url: optional_str(req, "imageUrl")?,
        class_id: optional_str(req, "classId")?,
    };
    let limits = setup::essay_limits(conn).map_err(|e| settings_failed(req, e))?;
    Ok(respond(req, "essay", essays::submit_essay(conn, new, &limits)))
}

fn handle_essays_get(conn: &Connection, req: &Request) -> ParamResult<Value> {
    let essay_id = required_str(req, "essayId")?;
    Ok(match essays::get_essay_with_feedback(conn, essay_id) {
        Ok(view) => ok(
            &req.id,
            serde_json::to_value(view).unwrap_or(Value::Null),
        ),
        Err(e) => core_err(&req.id, &e),
    })
}

fn handle_essays_update(conn: &Connection, req: &Request) -> ParamResult<Value> {
    let essay_id = required_str(req, "essayId")?;
    let image_url = match req.params.get("imageUrl") {
        None => None,
        Some(_) => Some(optional_str(req, "imageUrl")?),
    };
    let patch = EssayPatch {
        title: optional_str(req, "title")?,
        content: optional_str(req, "content")?,
        prompt: optional_str(req, "prompt")?,
        image_url,
    };
    let limits = setup::essay_limits(conn).map_err(|e| settings_failed(req, e))?;
    Ok(respond(
        req,
        "essay",
        essays::update_essay(conn, essay_id, patch, &limits),
    ))
}

fn handle_essays_delete(conn: &Connection, req: &Request) -> ParamResult<Value> {
    let essay_id = required_str(req, "essayId")?;
    Ok(respond(req, "deleted", essays::delete_essay(conn, essay_id)))
}

fn handle_essays_list_by_author(conn: &Connection, req: &Request) -> ParamResult<Value> {
    let author_id = required_str(req, "authorId")?;
    Ok(respond(
        req,
        "essays",
        essays::list_essays_by_author(conn, author_id),
    ))
}

fn handle_essays_list_by_class(conn: &Connection, req: &Request) -> ParamResult<Value> {
    let class_id = required_str(req, "classId")?;
    Ok(respond(
        req,
        "essays",
        essays::list_essays_by_class(conn, class_id),
    ))
}

fn handle_feedback_request(conn: &Connection, req: &Request) -> ParamResult<Value> {
    let essay_id = required_str(req, "essayId")?;
    let rescore = optional_bool(req, "rescore")?;
    let settings = setup::scoring_settings(conn).map_err(|e| settings_failed(req, e))?;
    let scorer = CommandScorer::from_settings(&settings);
    Ok(respond(
        req,
        "feedback",
        feedback::request_feedback(
            conn,
            essay_id,
            rescore,
            &scorer,
            ScoreBounds::from(&settings),
        ),
    ))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let handler: Handler = match req.method.as_str() {
        "essays.submit" => handle_essays_submit,
        "essays.get" => handle_essays_get,
        "essays.update" => handle_essays_update,
        "essays.delete" => handle_essays_delete,
        "essays.listByAuthor" => handle_essays_list_by_author,
        "essays.listByClass" => handle_essays_list_by_class,
        "feedback.request" => handle_feedback_request,
        _ => return None,
    };
    Some(with_conn(state, req, handler))
}
