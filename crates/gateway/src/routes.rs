use axum::body::Body;
use axum::extract::{Path, RawQuery, State};
use axum::http::{header, HeaderMap, Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use futures_util::stream::{self, StreamExt};
use serde_json::json;

use protocol::{fold_query, Command, FieldSpec, InvalidParameter, TranscodeMode, Transcoder};

use crate::error::ApiError;
use crate::relay::{relay, DaemonEndpoint};
use crate::stream::transcoded_body;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) daemon: DaemonEndpoint,
}

pub(crate) fn router(state: AppState) -> Router {
    Router::new()
        .route("/board", get(board))
        .route("/xymondboard", get(board))
        .route("/log/:hostname/:testname", get(log))
        .route("/xymondlog/:hostname/:testname", get(log))
        .route("/hostinfo", get(hostinfo))
        .route("/ghostlist", get(ghostlist))
        .route("/ghosts", get(ghostlist))
        .route("/ping", get(ping))
        .route("/clientlog/:hostname", get(clientlog))
        .route("/clientlog/:hostname/:section", get(clientlog_section))
        .route("/query/:hostname/:testname", get(query))
        .route("/enable/:hostname/:testname", post(enable))
        .route("/disable/:hostname/:testname", post(disable))
        .route("/notify/:hostname/:testname", post(notify))
        .route("/drop/:hostname", delete(drop_host))
        .route("/drop/:hostname/:testname", delete(drop_test))
        // Overlapping routes must agree on param names per position;
        // the handlers read the segments positionally.
        .route("/rename/:source/:target", post(rename_host))
        .route("/rename/:source/:target/:new_name", post(rename_test))
        .route("/schedule", get(schedule_list))
        .route("/schedule/:arg", delete(schedule_cancel).post(schedule_at))
        .route("/version", get(version))
        .fallback(not_found)
        .with_state(state)
        .layer(middleware::map_response(method_mismatch_to_not_found))
        .layer(middleware::from_fn(log_http_request))
}

/// Encodes, relays and transcodes one command. The first reply chunk is
/// awaited before the response starts so connect and first-read failures
/// still map to an error status; after that the body streams.
async fn relay_response(
    state: &AppState,
    command: Command,
    mode: TranscodeMode,
) -> Result<Response, ApiError> {
    let text = command.encode()?;
    tracing::debug!(op = command.verb(), command = %text, "relaying command");
    let mut reply = relay(&state.daemon, &text).await?;
    let first = reply.next().await.transpose()?;
    let reply = stream::iter(first.into_iter().map(Ok)).chain(reply);
    let content_type = match mode {
        TranscodeMode::Raw => "text/plain",
        _ => "application/json",
    };
    let body = transcoded_body(reply, Transcoder::new(mode));
    Ok(([(header::CONTENT_TYPE, content_type)], body).into_response())
}

async fn board(
    State(state): State<AppState>,
    RawQuery(raw): RawQuery,
) -> Result<Response, ApiError> {
    let filters = decode_query(raw.as_deref())?;
    let spec = requested_fields(&filters).unwrap_or_else(FieldSpec::board_default);
    relay_response(&state, Command::Board { filters }, TranscodeMode::Records(spec)).await
}

async fn log(
    State(state): State<AppState>,
    Path((hostname, testname)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    relay_response(
        &state,
        Command::Log { hostname, testname },
        TranscodeMode::Record(FieldSpec::log_default()),
    )
    .await
}

async fn hostinfo(
    State(state): State<AppState>,
    RawQuery(raw): RawQuery,
) -> Result<Response, ApiError> {
    let filters = decode_query(raw.as_deref())?;
    let spec = requested_fields(&filters).unwrap_or_else(FieldSpec::hostinfo_default);
    relay_response(&state, Command::HostInfo { filters }, TranscodeMode::Records(spec)).await
}

async fn ghostlist(State(state): State<AppState>) -> Result<Response, ApiError> {
    relay_response(
        &state,
        Command::GhostList,
        TranscodeMode::Records(FieldSpec::ghost_default()),
    )
    .await
}

async fn ping(State(state): State<AppState>) -> Result<Response, ApiError> {
    relay_response(&state, Command::Ping, TranscodeMode::Text).await
}

async fn clientlog(
    State(state): State<AppState>,
    Path(hostname): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    clientlog_reply(&state, hostname, None, &headers).await
}

async fn clientlog_section(
    State(state): State<AppState>,
    Path((hostname, section)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    clientlog_reply(&state, hostname, Some(section), &headers).await
}

async fn clientlog_reply(
    state: &AppState,
    hostname: String,
    section: Option<String>,
    headers: &HeaderMap,
) -> Result<Response, ApiError> {
    let mode = if accepts_text(headers) {
        TranscodeMode::Raw
    } else {
        TranscodeMode::Text
    };
    relay_response(state, Command::ClientLog { hostname, section }, mode).await
}

async fn query(
    State(state): State<AppState>,
    Path((hostname, testname)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    relay_response(&state, Command::Query { hostname, testname }, TranscodeMode::Text).await
}

async fn enable(
    State(state): State<AppState>,
    Path((hostname, testname)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    relay_response(&state, Command::Enable { hostname, testname }, TranscodeMode::Text).await
}

async fn disable(
    State(state): State<AppState>,
    Path((hostname, testname)): Path<(String, String)>,
    RawQuery(raw): RawQuery,
    body: String,
) -> Result<Response, ApiError> {
    let params = decode_query(raw.as_deref())?;
    let duration = params
        .iter()
        .find(|(key, _)| key == "duration")
        .map(|(_, value)| value.clone());
    relay_response(
        &state,
        Command::Disable {
            hostname,
            testname,
            duration,
            reason: body,
        },
        TranscodeMode::Text,
    )
    .await
}

async fn notify(
    State(state): State<AppState>,
    Path((hostname, testname)): Path<(String, String)>,
    body: String,
) -> Result<Response, ApiError> {
    relay_response(
        &state,
        Command::Notify {
            hostname,
            testname,
            message: body,
        },
        TranscodeMode::Text,
    )
    .await
}

async fn drop_host(
    State(state): State<AppState>,
    Path(hostname): Path<String>,
) -> Result<Response, ApiError> {
    relay_response(
        &state,
        Command::Drop {
            hostname,
            testname: None,
        },
        TranscodeMode::Text,
    )
    .await
}

async fn drop_test(
    State(state): State<AppState>,
    Path((hostname, testname)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    relay_response(
        &state,
        Command::Drop {
            hostname,
            testname: Some(testname),
        },
        TranscodeMode::Text,
    )
    .await
}

async fn rename_host(
    State(state): State<AppState>,
    Path((source, target)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    relay_response(&state, Command::RenameHost { source, target }, TranscodeMode::Text).await
}

async fn rename_test(
    State(state): State<AppState>,
    Path((hostname, source, target)): Path<(String, String, String)>,
) -> Result<Response, ApiError> {
    relay_response(
        &state,
        Command::RenameTest {
            hostname,
            source,
            target,
        },
        TranscodeMode::Text,
    )
    .await
}

async fn schedule_list(State(state): State<AppState>) -> Result<Response, ApiError> {
    relay_response(&state, Command::ScheduleList, TranscodeMode::Tasks).await
}

async fn schedule_cancel(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    relay_response(&state, Command::ScheduleCancel { id }, TranscodeMode::Text).await
}

async fn schedule_at(
    State(state): State<AppState>,
    Path(timestamp): Path<String>,
    body: String,
) -> Result<Response, ApiError> {
    relay_response(
        &state,
        Command::ScheduleAt {
            timestamp,
            command: body,
        },
        TranscodeMode::Text,
    )
    .await
}

/// Answered locally, without contacting the daemon.
async fn version() -> Json<serde_json::Value> {
    Json(json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn not_found() -> Response {
    (StatusCode::NOT_FOUND, Json(json!({ "error": "not found" }))).into_response()
}

/// Wrong-method requests on known paths answer the same JSON 404 as
/// unknown paths instead of the router's bare 405.
async fn method_mismatch_to_not_found(response: Response) -> Response {
    if response.status() == StatusCode::METHOD_NOT_ALLOWED {
        return not_found().await;
    }
    response
}

/// Decodes the raw query string into pairs, preserving caller order.
/// Map-based extractors would lose both the order and repeated keys.
fn decode_query(raw: Option<&str>) -> Result<Vec<(String, String)>, InvalidParameter> {
    let raw = raw.unwrap_or_default();
    let pairs: Vec<(String, String)> =
        serde_urlencoded::from_str(raw).map_err(|_| InvalidParameter::Malformed {
            name: "query",
            value: raw.to_string(),
        })?;
    Ok(fold_query(pairs))
}

fn requested_fields(filters: &[(String, String)]) -> Option<FieldSpec> {
    filters
        .iter()
        .find(|(key, _)| key == "fields")
        .map(|(_, list)| FieldSpec::parse(list))
}

/// Raw text unless the client asks for something that is not text; an
/// absent Accept header counts as accepting text. A range refused with
/// `q=0` never matches.
fn accepts_text(headers: &HeaderMap) -> bool {
    let Some(accept) = headers.get(header::ACCEPT) else {
        return true;
    };
    let Ok(accept) = accept.to_str() else {
        return false;
    };
    accept.split(',').any(|range| {
        let media = range.split(';').next().unwrap_or("").trim();
        let text = media.eq_ignore_ascii_case("text/plain")
            || media.eq_ignore_ascii_case("text/*")
            || media == "*/*";
        text && !refused(range)
    })
}

/// A `q=0` parameter marks its range explicitly not acceptable.
fn refused(range: &str) -> bool {
    range.split(';').skip(1).any(|param| {
        let mut pair = param.splitn(2, '=');
        let key = pair.next().unwrap_or("").trim();
        let value = pair.next().unwrap_or("").trim();
        key.eq_ignore_ascii_case("q") && value.parse::<f32>().is_ok_and(|q| q == 0.0)
    })
}

async fn log_http_request(req: Request<Body>, next: Next) -> Response {
    let method = req.method().clone();
    let uri = req.uri().clone();
    let started = std::time::Instant::now();
    let response = next.run(req).await;
    let status = response.status();
    tracing::info!(
        method = %method,
        uri = %uri,
        status = %status,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "http request"
    );
    response
}
