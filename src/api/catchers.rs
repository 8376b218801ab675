use rocket::Request;
use rocket::http::Status;
use rocket::response::status::Custom;
use rocket::serde::json::Json;
use serde_json::{Value, json};
use tracing::warn;

use crate::auth::auth_failure_message;

fn error_body(status: Status, message: impl Into<String>) -> Custom<Json<Value>> {
    Custom(status, Json(json!({ "error": message.into() })))
}

#[catch(400)]
pub fn bad_request(_req: &Request) -> Custom<Json<Value>> {
    error_body(Status::BadRequest, "Bad request")
}

#[catch(401)]
pub fn unauthorized_api(req: &Request) -> Custom<Json<Value>> {
    let message = auth_failure_message(req);
    warn!(uri = %req.uri(), reason = %message, "Unauthorized API request");
    error_body(Status::Unauthorized, message)
}

#[catch(403)]
pub fn forbidden(_req: &Request) -> Custom<Json<Value>> {
    error_body(Status::Forbidden, "Forbidden")
}

#[catch(404)]
pub fn not_found(req: &Request) -> Custom<Json<Value>> {
    error_body(
        Status::NotFound,
        format!("No route for {} {}", req.method(), req.uri().path()),
    )
}

#[catch(413)]
pub fn payload_too_large(_req: &Request) -> Custom<Json<Value>> {
    error_body(Status::PayloadTooLarge, "Uploaded file is too large")
}

// Form and JSON guards that fail to parse report 422; clients get a plain
// validation failure.
#[catch(422)]
pub fn unprocessable(_req: &Request) -> Custom<Json<Value>> {
    error_body(Status::BadRequest, "Malformed request body")
}

#[catch(429)]
pub fn too_many_requests(_req: &Request) -> Custom<Json<Value>> {
    error_body(Status::TooManyRequests, "Too many requests, slow down")
}

#[catch(500)]
pub fn internal_error(_req: &Request) -> Custom<Json<Value>> {
    error_body(Status::InternalServerError, "Internal server error")
}

pub fn catchers() -> Vec<rocket::Catcher> {
    catchers![
        bad_request,
        unauthorized_api,
        forbidden,
        not_found,
        payload_too_large,
        unprocessable,
        too_many_requests,
        internal_error,
    ]
}
