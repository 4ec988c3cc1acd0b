use std::convert::Infallible;

use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use warp::{http::StatusCode, reply, reply::Response, Filter, Rejection, Reply};

use super::types::{ApiError, IndexQuery, StopAccepted};
use crate::error_handling::types::{SessionError, SplitError, StorageError};
use crate::session_management::{CaptureController, CaptureRequest, ImportRequest};

const MAX_BODY_BYTES: u64 = 64 * 1024;

fn with_controller(
    controller: CaptureController,
) -> impl Filter<Extract = (CaptureController,), Error = Infallible> + Clone {
    warp::any().map(move || controller.clone())
}

fn json_body<T: DeserializeOwned + Send>() -> impl Filter<Extract = (T,), Error = Rejection> + Clone
{
    warp::body::content_length_limit(MAX_BODY_BYTES).and(warp::body::json())
}

fn json_with_status<T: Serialize>(value: &T, status: StatusCode) -> Response {
    reply::with_status(reply::json(value), status).into_response()
}

/// HTTP status a controller error is reported with.
pub fn status_for(err: &SessionError) -> StatusCode {
    match err {
        SessionError::AlreadyActive(_)
        | SessionError::NotCapturing(_)
        | SessionError::InvalidTransition { .. }
        | SessionError::StillInProgress(_) => StatusCode::CONFLICT,
        SessionError::NothingToImport(_)
        | SessionError::NotASplitFolder(_)
        | SessionError::StorageError(StorageError::NotFound(_)) => StatusCode::NOT_FOUND,
        SessionError::InvalidRequest(_) | SessionError::SplitError(SplitError::InvalidSnapLen(_)) => {
            StatusCode::BAD_REQUEST
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_reply(err: &SessionError) -> Response {
    let status = status_for(err);
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        warn!("Request failed: {}", err);
    } else {
        debug!("Request refused ({}): {}", status, err);
    }
    json_with_status(&ApiError::new(err.to_string()), status)
}

pub async fn get_session(controller: CaptureController) -> Result<Response, Rejection> {
    Ok(json_with_status(&controller.snapshot(), StatusCode::OK))
}

pub async fn start_capture(
    controller: CaptureController,
    request: CaptureRequest,
) -> Result<Response, Rejection> {
    Ok(match controller.start_capture(request) {
        Ok(session) => json_with_status(&session, StatusCode::ACCEPTED),
        Err(e) => error_reply(&e),
    })
}

pub async fn stop_capture(controller: CaptureController) -> Result<Response, Rejection> {
    Ok(match controller.stop_capture() {
        Ok(()) => json_with_status(&StopAccepted { stopping: true }, StatusCode::ACCEPTED),
        Err(e) => error_reply(&e),
    })
}

pub async fn import(
    controller: CaptureController,
    request: ImportRequest,
) -> Result<Response, Rejection> {
    Ok(match controller.import(request).await {
        Ok(index) => json_with_status(&index, StatusCode::OK),
        Err(e) => error_reply(&e),
    })
}

pub async fn get_index(
    controller: CaptureController,
    query: IndexQuery,
) -> Result<Response, Rejection> {
    Ok(match controller.read_index(&query.dir) {
        Ok(index) => json_with_status(&index, StatusCode::OK),
        Err(e) => error_reply(&e),
    })
}

pub async fn get_progress(controller: CaptureController) -> Result<Response, Rejection> {
    Ok(json_with_status(&controller.progress(), StatusCode::OK))
}

/// GET /session
pub fn session_route(
    controller: CaptureController,
) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
    warp::path("session")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_controller(controller))
        .and_then(get_session)
}

/// POST /capture/start
pub fn start_capture_route(
    controller: CaptureController,
) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
    warp::path!("capture" / "start")
        .and(warp::post())
        .and(with_controller(controller))
        .and(json_body::<CaptureRequest>())
        .and_then(start_capture)
}

/// POST /capture/stop
pub fn stop_capture_route(
    controller: CaptureController,
) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
    warp::path!("capture" / "stop")
        .and(warp::post())
        .and(with_controller(controller))
        .and_then(stop_capture)
}

/// POST /import
pub fn import_route(
    controller: CaptureController,
) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
    warp::path("import")
        .and(warp::path::end())
        .and(warp::post())
        .and(with_controller(controller))
        .and(json_body::<ImportRequest>())
        .and_then(import)
}

/// GET /index?dir=<path>
pub fn index_route(
    controller: CaptureController,
) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
    warp::path("index")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_controller(controller))
        .and(warp::query::<IndexQuery>())
        .and_then(get_index)
}

/// GET /progress
pub fn progress_route(
    controller: CaptureController,
) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
    warp::path("progress")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_controller(controller))
        .and_then(get_progress)
}

/// Turns warp rejections into `{ "message": ... }` replies.
pub async fn handle_rejection(err: Rejection) -> Result<Response, Infallible> {
    let (status, message) = if err.is_not_found() {
        (StatusCode::NOT_FOUND, "Not found".to_string())
    } else if let Some(e) = err.find::<warp::filters::body::BodyDeserializeError>() {
        (StatusCode::BAD_REQUEST, format!("Invalid request body: {}", e))
    } else if let Some(e) = err.find::<warp::reject::InvalidQuery>() {
        (StatusCode::BAD_REQUEST, e.to_string())
    } else if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        (StatusCode::PAYLOAD_TOO_LARGE, "Request body too large".to_string())
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "Method not allowed".to_string())
    } else {
        warn!("Unhandled rejection: {:?}", err);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal error".to_string(),
        )
    };
    Ok(json_with_status(&ApiError::new(message), status))
}
