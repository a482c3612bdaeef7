use crate::classroom;
use crate::ipc::helpers::{optional_str, required_str, respond, with_conn, Handler, ParamResult};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::Value;

fn handle_classes_create(conn: &Connection, req: &Request) -> ParamResult<Value> {
    let teacher_id = required_str(req, "teacherId")?;
    let name = required_str(req, "name")?;
    let description = optional_str(req, "description")?;
    Ok(respond(
        req,
        "class",
        classroom::create_class(conn, teacher_id, name, description),
    ))
}

fn handle_classes_get(conn: &Connection, req: &Request) -> ParamResult<Value> {
    let class_id = required_str(req, "classId")?;
    Ok(respond(req, "class", classroom::get_class(conn, class_id)))
}

fn handle_classes_delete(conn: &Connection, req: &Request) -> ParamResult<Value> {
    let class_id = required_str(req, "classId")?;
    Ok(respond(req, "deleted", classroom::delete_class(conn, class_id)))
}

fn handle_classes_list_for(conn: &Connection, req: &Request) -> ParamResult<Value> {
    let user_id = required_str(req, "userId")?;
    Ok(respond(
        req,
        "classes",
        classroom::list_classes_for(conn, user_id),
    ))
}

fn handle_classes_roster(conn: &Connection, req: &Request) -> ParamResult<Value> {
    let class_id = required_str(req, "classId")?;
    Ok(respond(
        req,
        "students",
        classroom::list_roster_for(conn, class_id),
    ))
}

fn handle_students_enroll(conn: &Connection, req: &Request) -> ParamResult<Value> {
    let user_id = required_str(req, "userId")?;
    let class_id = required_str(req, "classId")?;
    Ok(respond(
        req,
        "enrollment",
        classroom::enroll(conn, user_id, class_id),
    ))
}

fn handle_students_unenroll(conn: &Connection, req: &Request) -> ParamResult<Value> {
    let user_id = required_str(req, "userId")?;
    let class_id = required_str(req, "classId")?;
    Ok(respond(
        req,
        "removed",
        classroom::unenroll(conn, user_id, class_id),
    ))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let handler: Handler = match req.method.as_str() {
        "classes.create" => handle_classes_create,
        "classes.get" => handle_classes_get,
        "classes.delete" => handle_classes_delete,
        "classes.listFor" => handle_classes_list_for,
        "classes.roster" => handle_classes_roster,
        "students.enroll" => handle_students_enroll,
        "students.unenroll" => handle_students_unenroll,
        _ => return None,
    };
    Some(with_conn(state, req, handler))
}
