use crate::identity::{self, NewAccount};
use crate::ipc::error::{core_err, err, ok};
use crate::ipc::helpers::{
    now_param, optional_str, required_str, required_time, respond, with_conn, Handler, ParamResult,
};
use crate::ipc::types::{AppState, Request};
use crate::model::{AccountTokens, Role};
use rusqlite::Connection;
use serde_json::{json, Value};

fn parse_role(req: &Request, raw: Option<&str>) -> ParamResult<Role> {
    match raw {
        None => Ok(Role::Student),
        Some(r) => Role::parse(r).ok_or_else(|| {
            err(
                &req.id,
                "bad_params",
                "role must be one of: STUDENT, TEACHER, ADMIN",
                None,
            )
        }),
    }
}

fn handle_users_create(conn: &Connection, req: &Request) -> ParamResult<Value> {
    let email = required_str(req, "email")?;
    let name = optional_str(req, "name")?;
    let hashed_password = optional_str(req, "hashedPassword")?;
    let role = parse_role(req, optional_str(req, "role")?)?;
    Ok(respond(
        req,
        "user",
        identity::create_user(conn, email, name, hashed_password, role),
    ))
}

fn handle_users_get(conn: &Connection, req: &Request) -> ParamResult<Value> {
    let user_id = required_str(req, "userId")?;
    Ok(match identity::get_user(conn, user_id) {
        Ok(user) => ok(
            &req.id,
            json!({ "user": user, "hasPassword": user.has_password() }),
        ),
        Err(e) => core_err(&req.id, &e),
    })
}

fn handle_users_get_by_email(conn: &Connection, req: &Request) -> ParamResult<Value> {
    let email = required_str(req, "email")?;
    Ok(respond(req, "user", identity::get_user_by_email(conn, email)))
}

fn handle_users_get_by_account(conn: &Connection, req: &Request) -> ParamResult<Value> {
    let provider = required_str(req, "provider")?;
    let provider_account_id = required_str(req, "providerAccountId")?;
    Ok(respond(
        req,
        "user",
        identity::get_user_by_account(conn, provider, provider_account_id),
    ))
}

fn handle_users_set_role(conn: &Connection, req: &Request) -> ParamResult<Value> {
    let user_id = required_str(req, "userId")?;
    let role = parse_role(req, Some(required_str(req, "role")?))?;
    Ok(respond(req, "user", identity::set_role(conn, user_id, role)))
}

fn handle_users_mark_email_verified(conn: &Connection, req: &Request) -> ParamResult<Value> {
    let user_id = required_str(req, "userId")?;
    let at = now_param(req)?;
    Ok(respond(
        req,
        "user",
        identity::mark_email_verified(conn, user_id, at),
    ))
}

fn handle_users_delete(conn: &Connection, req: &Request) -> ParamResult<Value> {
    let user_id = required_str(req, "userId")?;
    Ok(respond(req, "deleted", identity::delete_user(conn, user_id)))
}

fn handle_accounts_link(conn: &Connection, req: &Request) -> ParamResult<Value> {
    let user_id = required_str(req, "userId")?;
    let kind = optional_str(req, "type")?.unwrap_or("oauth");
    let provider = required_str(req, "provider")?;
    let provider_account_id = required_str(req, "providerAccountId")?;
    let tokens: AccountTokens = match req.params.get("tokens") {
        None | Some(Value::Null) => AccountTokens::default(),
        Some(v) => serde_json::from_value(v.clone()).map_err(|e| {
            err(
                &req.id,
                "bad_params",
                format!("tokens: {}", e),
                None,
            )
        })?,
    };
    Ok(respond(
        req,
        "account",
        identity::link_account(
            conn,
            user_id,
            NewAccount {
                kind,
                provider,
                provider_account_id,
                tokens,
            },
        ),
    ))
}

fn handle_accounts_unlink(conn: &Connection, req: &Request) -> ParamResult<Value> {
    let provider = required_str(req, "provider")?;
    let provider_account_id = required_str(req, "providerAccountId")?;
    Ok(respond(
        req,
        "unlinked",
        identity::unlink_account(conn, provider, provider_account_id).map(|_| true),
    ))
}

fn handle_accounts_list(conn: &Connection, req: &Request) -> ParamResult<Value> {
    let user_id = required_str(req, "userId")?;
    Ok(respond(req, "accounts", identity::list_accounts(conn, user_id)))
}

fn handle_sessions_create(conn: &Connection, req: &Request) -> ParamResult<Value> {
    let user_id = required_str(req, "userId")?;
    let session_token = required_str(req, "sessionToken")?;
    let expires = required_time(req, "expires")?;
    Ok(respond(
        req,
        "session",
        identity::create_session(conn, user_id, session_token, expires),
    ))
}

fn handle_sessions_get(conn: &Connection, req: &Request) -> ParamResult<Value> {
    let session_token = required_str(req, "sessionToken")?;
    let now = now_param(req)?;
    Ok(respond(
        req,
        "session",
        identity::get_session(conn, session_token, now),
    ))
}

fn handle_sessions_update_expiry(conn: &Connection, req: &Request) -> ParamResult<Value> {
    let session_token = required_str(req, "sessionToken")?;
    let expires = required_time(req, "expires")?;
    Ok(respond(
        req,
        "session",
        identity::update_session_expiry(conn, session_token, expires),
    ))
}

fn handle_sessions_delete(conn: &Connection, req: &Request) -> ParamResult<Value> {
    let session_token = required_str(req, "sessionToken")?;
    Ok(respond(
        req,
        "deleted",
        identity::delete_session(conn, session_token),
    ))
}

fn handle_sessions_purge_expired(conn: &Connection, req: &Request) -> ParamResult<Value> {
    let now = now_param(req)?;
    Ok(respond(
        req,
        "removed",
        identity::purge_expired_sessions(conn, now),
    ))
}

fn handle_verification_tokens_issue(conn: &Connection, req: &Request) -> ParamResult<Value> {
    let identifier = required_str(req, "identifier")?;
    let token = required_str(req, "token")?;
    let expires = required_time(req, "expires")?;
    Ok(respond(
        req,
        "verificationToken",
        identity::issue_verification_token(conn, identifier, token, expires),
    ))
}

fn handle_verification_tokens_consume(conn: &Connection, req: &Request) -> ParamResult<Value> {
    let identifier = required_str(req, "identifier")?;
    let token = required_str(req, "token")?;
    let now = now_param(req)?;
    Ok(respond(
        req,
        "verificationToken",
        identity::consume_verification_token(conn, identifier, token, now),
    ))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let handler: Handler = match req.method.as_str() {
        "users.create" => handle_users_create,
        "users.get" => handle_users_get,
        "users.getByEmail" => handle_users_get_by_email,
        "users.getByAccount" => handle_users_get_by_account,
        "users.setRole" => handle_users_set_role,
        "users.markEmailVerified" => handle_users_mark_email_verified,
        "users.delete" => handle_users_delete,
        "accounts.link" => handle_accounts_link,
        "accounts.unlink" => handle_accounts_unlink,
        "accounts.list" => handle_accounts_list,
        "sessions.create" => handle_sessions_create,
        "sessions.get" => handle_sessions_get,
        "sessions.updateExpiry" => handle_sessions_update_expiry,
        "sessions.delete" => handle_sessions_delete,
        "sessions.purgeExpired" => handle_sessions_purge_expired,
        "verificationTokens.issue" => handle_verification_tokens_issue,
        "verificationTokens.consume" => handle_verification_tokens_consume,
        _ => return None,
    };
    Some(with_conn(state, req, handler))
}
