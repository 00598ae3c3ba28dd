//! Request routing: warp filters mapping HTTP requests onto [`ControlPlane`]
//! operations.
//!
//! | Method & path | Success |
//! |---|---|
//! | `POST /api/telemetry` | `202` |
//! | `GET /api/state/{vehicleId}` | `200` snapshot |
//! | `POST /api/commands` | `200 {"enqueued":true}` |
//! | `GET /api/commands/next` | `200` head command, `204` when empty |
//! | `POST /api/missions` | `200` stored mission |
//! | `GET /api/missions/{taskId}` | `200` mission |
//! | `POST /api/missions/{taskId}/{action}` | `200 {"ok":true,"action":..}` |
//! | `GET /api/health` | `200` counters |
//! | `GET /ws/telemetry/{vehicleId}` | WebSocket upgrade |
//! | `OPTIONS *` | `204`; CORS preflights are answered by the CORS layer |
//!
//! Every `/api/*` request must carry an `Authorization` header containing
//! the configured token. Bodies are JSON and capped at [`MAX_BODY_BYTES`].

use std::convert::Infallible;
use std::sync::Arc;

use hydronom_kernel::ControlPlane;
use hydronom_middleware::CommandDrain;
use hydronom_types::{CommandRecord, FleetError, MissionRecord, Telemetry};
use percent_encoding::percent_decode_str;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};
use warp::filters::BoxedFilter;
use warp::http::{Method, StatusCode};
use warp::http::uri::Authority;
use warp::reply::Response;
use warp::{Filter, Rejection, Reply};

use crate::ws;

/// Development token accepted when none is configured.
pub const DEFAULT_AUTH_TOKEN: &str = "DEV_TOKEN";

/// Dashboard origin allowed by default.
pub const DEFAULT_CORS_ORIGIN: &str = "http://localhost:5173";

/// Largest accepted request body.
pub const MAX_BODY_BYTES: u64 = 1024 * 1024;

/// The API surface of one [`ControlPlane`].
pub struct Router {
    plane: ControlPlane,
    /// The single consumer end of the command queue, served to the control
    /// channel over `GET /api/commands/next`.
    drain: Mutex<CommandDrain>,
    auth_token: String,
    cors_origin: String,
}

impl Router {
    pub fn new(plane: ControlPlane, drain: CommandDrain) -> Self {
        Self {
            plane,
            drain: Mutex::new(drain),
            auth_token: DEFAULT_AUTH_TOKEN.to_string(),
            cors_origin: DEFAULT_CORS_ORIGIN.to_string(),
        }
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = token.into();
        self
    }

    /// Allowed dashboard origin (`scheme://host[:port]`, or `*`).
    pub fn with_cors_origin(mut self, origin: impl Into<String>) -> Self {
        self.cors_origin = origin.into();
        self
    }

    pub fn plane(&self) -> &ControlPlane {
        &self.plane
    }

    pub fn cors_origin(&self) -> &str {
        &self.cors_origin
    }

    /// Assemble the complete filter tree: preflight, API, live stream,
    /// rejection mapping and CORS.
    ///
    /// # Errors
    ///
    /// Returns [`FleetError::Validation`] when the CORS origin is not of the
    /// form `scheme://host[:port]`.
    pub fn into_filter(
        self,
    ) -> Result<impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone, FleetError> {
        let cors = cors_policy(&self.cors_origin)?;
        let plane = self.plane.clone();
        let router = Arc::new(self);

        let api = warp::path("api").and(authorized(router.auth_token.clone())).and(api_routes(&router));

        Ok(preflight()
            .or(api)
            .unify()
            .or(ws::live_route(plane))
            .unify()
            .recover(handle_rejection)
            .unify()
            .with(cors))
    }
}

// ---------------------------------------------------------------------------
// Filters
// ---------------------------------------------------------------------------

fn with_router(router: Arc<Router>) -> impl Filter<Extract = (Arc<Router>,), Error = Infallible> + Clone {
    warp::any().map(move || Arc::clone(&router))
}

/// Plain `OPTIONS` on any path. Other methods fall through as "not found"
/// so they never mask a real route's rejection.
fn preflight() -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
    warp::method().and_then(|method: Method| async move {
        if method == Method::OPTIONS {
            Ok(StatusCode::NO_CONTENT.into_response())
        } else {
            Err(warp::reject::not_found())
        }
    })
}

/// Rejected with [`Unauthorized`] unless the `Authorization` header
/// contains the configured token.
fn authorized(token: String) -> impl Filter<Extract = (), Error = Rejection> + Clone {
    warp::header::optional::<String>("authorization")
        .and_then(move |header: Option<String>| {
            let token = token.clone();
            async move {
                if header.is_some_and(|value| value.contains(&token)) {
                    Ok(())
                } else {
                    Err(warp::reject::custom(Unauthorized(token)))
                }
            }
        })
        .untuple_one()
}

/// One percent-decoded path segment.
pub(crate) fn segment() -> impl Filter<Extract = (String,), Error = Rejection> + Clone {
    warp::path::param::<String>().and_then(|raw: String| async move {
        percent_decode_str(&raw)
            .decode_utf8()
            .map(|decoded| decoded.into_owned())
            .map_err(|_| warp::reject::not_found())
    })
}

fn json_body<T: DeserializeOwned + Send>() -> impl Filter<Extract = (T,), Error = Rejection> + Clone {
    warp::body::content_length_limit(MAX_BODY_BYTES).and(warp::body::json())
}

fn api_routes(router: &Arc<Router>) -> BoxedFilter<(Response,)> {
    let telemetry = warp::path("telemetry")
        .and(warp::path::end())
        .and(warp::post())
        .and(json_body::<Telemetry>())
        .and(with_router(Arc::clone(router)))
        .and_then(ingest);

    let state = warp::path("state")
        .and(segment())
        .and(warp::path::end())
        .and(warp::get())
        .and(with_router(Arc::clone(router)))
        .and_then(latest_state);

    let submit = warp::path("commands")
        .and(warp::path::end())
        .and(warp::post())
        .and(json_body::<CommandRecord>())
        .and(with_router(Arc::clone(router)))
        .and_then(submit_command);

    let next = warp::path!("commands" / "next")
        .and(warp::get())
        .and(with_router(Arc::clone(router)))
        .and_then(next_command);

    let upsert = warp::path("missions")
        .and(warp::path::end())
        .and(warp::post())
        .and(json_body::<MissionRecord>())
        .and(with_router(Arc::clone(router)))
        .and_then(upsert_mission);

    let mission = warp::path("missions")
        .and(segment())
        .and(warp::path::end())
        .and(warp::get())
        .and(with_router(Arc::clone(router)))
        .and_then(get_mission);

    let action = warp::path("missions")
        .and(segment())
        .and(segment())
        .and(warp::path::end())
        .and(warp::post())
        .and(with_router(Arc::clone(router)))
        .and_then(mission_action);

    let health = warp::path!("health")
        .and(warp::get())
        .and(with_router(Arc::clone(router)))
        .and_then(health);

    telemetry
        .or(state)
        .unify()
        .or(submit)
        .unify()
        .or(next)
        .unify()
        .or(upsert)
        .unify()
        .or(mission)
        .unify()
        .or(action)
        .unify()
        .or(health)
        .unify()
        .boxed()
}

fn cors_policy(origin: &str) -> Result<warp::cors::Builder, FleetError> {
    let cors = warp::cors()
        .allow_methods(vec!["GET", "POST", "OPTIONS"])
        .allow_headers(vec!["authorization", "content-type"]);
    if origin == "*" {
        return Ok(cors.allow_any_origin());
    }
    let valid = origin.split_once("://").is_some_and(|(scheme, rest)| {
        !scheme.is_empty()
            && scheme.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
            && !rest.contains('@')
            && rest.parse::<Authority>().is_ok()
    });
    if !valid {
        return Err(FleetError::Validation(format!("invalid CORS origin {origin:?}")));
    }
    Ok(cors.allow_origin(origin))
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn ingest(snapshot: Telemetry, router: Arc<Router>) -> Result<Response, Infallible> {
    Ok(match router.plane.ingest_telemetry(snapshot).await {
        Ok(_) => StatusCode::ACCEPTED.into_response(),
        Err(e) => error_response(&e),
    })
}

async fn latest_state(vehicle_id: String, router: Arc<Router>) -> Result<Response, Infallible> {
    Ok(match router.plane.latest_state(&vehicle_id) {
        Some(snapshot) => json_reply(StatusCode::OK, snapshot.as_ref()),
        None => error_response(&FleetError::NotFound(format!("vehicle {vehicle_id}"))),
    })
}

async fn submit_command(command: CommandRecord, router: Arc<Router>) -> Result<Response, Infallible> {
    Ok(match router.plane.submit_command(command).await {
        Ok(()) => json_reply(StatusCode::OK, &json!({ "enqueued": true })),
        Err(e) => error_response(&e),
    })
}

async fn next_command(router: Arc<Router>) -> Result<Response, Infallible> {
    let next = router.drain.lock().await.try_dequeue();
    Ok(match next {
        Some(command) => json_reply(StatusCode::OK, &command),
        None => StatusCode::NO_CONTENT.into_response(),
    })
}

async fn upsert_mission(mission: MissionRecord, router: Arc<Router>) -> Result<Response, Infallible> {
    Ok(match router.plane.upsert_mission(mission) {
        Ok(stored) => json_reply(StatusCode::OK, stored.as_ref()),
        Err(e) => error_response(&e),
    })
}

async fn get_mission(task_id: String, router: Arc<Router>) -> Result<Response, Infallible> {
    Ok(match router.plane.mission(&task_id) {
        Some(mission) => json_reply(StatusCode::OK, mission.as_ref()),
        None => error_response(&FleetError::NotFound(format!("mission {task_id}"))),
    })
}

async fn mission_action(
    task_id: String,
    action: String,
    router: Arc<Router>,
) -> Result<Response, Infallible> {
    Ok(match router.plane.mission_action(&task_id, &action).await {
        Ok(_) => json_reply(StatusCode::OK, &json!({ "ok": true, "action": action })),
        Err(e) => error_response(&e),
    })
}

async fn health(router: Arc<Router>) -> Result<Response, Infallible> {
    let cache = router.plane.cache();
    Ok(json_reply(
        StatusCode::OK,
        &json!({
            "status": "ok",
            "vehicles": cache.vehicle_count(),
            "missions": cache.mission_count(),
            "pending_commands": router.plane.pending_commands(),
        }),
    ))
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Missing or wrong API token. Carries the expected token for the hint.
#[derive(Debug)]
struct Unauthorized(String);

impl warp::reject::Reject for Unauthorized {}

fn json_reply<T: Serialize>(status: StatusCode, body: &T) -> Response {
    warp::reply::with_status(warp::reply::json(body), status).into_response()
}

fn error_reply(status: StatusCode, message: &str) -> Response {
    json_reply(status, &json!({ "error": message }))
}

/// Map a core error onto a status code and a JSON error body.
pub fn error_response(err: &FleetError) -> Response {
    match err {
        FleetError::Validation(msg) => error_reply(StatusCode::BAD_REQUEST, msg),
        FleetError::NotFound(msg) => error_reply(StatusCode::NOT_FOUND, &format!("{msg} not found")),
        FleetError::Storage(e) => {
            error!(error = %e, "journal write failed");
            error_reply(StatusCode::INTERNAL_SERVER_ERROR, "storage failure")
        }
        FleetError::Serialization(msg) | FleetError::Transport(msg) => {
            warn!(error = %msg, "request failed");
            error_reply(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
        }
    }
}

async fn handle_rejection(err: Rejection) -> Result<Response, Infallible> {
    let reply = if let Some(Unauthorized(token)) = err.find::<Unauthorized>() {
        debug!("rejected unauthenticated request");
        error_reply(StatusCode::UNAUTHORIZED, &format!("Unauthorized: use Bearer {token}"))
    } else if err.find::<warp::filters::body::BodyDeserializeError>().is_some() {
        error_reply(StatusCode::BAD_REQUEST, "Invalid payload")
    } else if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        error_reply(StatusCode::PAYLOAD_TOO_LARGE, "request body exceeds 1 MiB")
    } else if err.find::<warp::reject::LengthRequired>().is_some() {
        error_reply(StatusCode::LENGTH_REQUIRED, "Content-Length required")
    } else if err.find::<warp::reject::UnsupportedMediaType>().is_some() {
        error_reply(StatusCode::UNSUPPORTED_MEDIA_TYPE, "expected application/json")
    } else if let Some(e) = err.find::<warp::reject::MissingHeader>() {
        error_reply(StatusCode::BAD_REQUEST, &e.to_string())
    } else if let Some(e) = err.find::<warp::reject::InvalidHeader>() {
        error_reply(StatusCode::BAD_REQUEST, &e.to_string())
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        error_reply(StatusCode::METHOD_NOT_ALLOWED, "method not allowed")
    } else if err.is_not_found() {
        error_reply(StatusCode::NOT_FOUND, "not found")
    } else {
        // Every remaining rejection comes from warp's own request checks.
        debug!(rejection = ?err, "malformed request");
        error_reply(StatusCode::BAD_REQUEST, "bad request")
    };
    Ok(reply)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hydronom_middleware::{SubscriptionHub, command_queue};
    use hydronom_store::{Journal, StateCache};
    use serde_json::Value;
    use tempfile::TempDir;
    use warp::hyper::body::Bytes;

    fn api() -> (
        TempDir,
        ControlPlane,
        impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone + 'static,
    ) {
        let dir = tempfile::tempdir().unwrap();
        let (commands, drain) = command_queue();
        let plane = ControlPlane::new(
            Arc::new(StateCache::new()),
            Arc::new(Journal::open(dir.path()).unwrap()),
            Arc::new(SubscriptionHub::default()),
            commands,
        );
        let filter = Router::new(plane.clone(), drain).into_filter().unwrap();
        (dir, plane, filter)
    }

    fn authed(method: &str, path: &str) -> warp::test::RequestBuilder {
        warp::test::request()
            .method(method)
            .path(path)
            .header("authorization", "Bearer DEV_TOKEN")
    }

    async fn call<F>(api: &F, method: &str, path: &str, body: Option<Value>) -> warp::http::Response<Bytes>
    where
        F: Filter + 'static,
        F::Extract: Reply + Send,
    {
        let req = authed(method, path);
        let req = match body {
            Some(body) => req.json(&body),
            None => req,
        };
        req.reply(api).await
    }

    fn body(resp: &warp::http::Response<Bytes>) -> Value {
        serde_json::from_slice(resp.body()).unwrap()
    }

    #[tokio::test]
    async fn api_requires_token() {
        let (_dir, _plane, api) = api();
        let resp = warp::test::request().path("/api/health").reply(&api).await;
        assert_eq!(resp.status(), 401);
        assert_eq!(body(&resp)["error"], "Unauthorized: use Bearer DEV_TOKEN");

        let resp = warp::test::request()
            .path("/api/health")
            .header("authorization", "Bearer WRONG")
            .reply(&api)
            .await;
        assert_eq!(resp.status(), 401);
    }

    #[tokio::test]
    async fn custom_token_is_honoured() {
        let dir = tempfile::tempdir().unwrap();
        let (commands, drain) = command_queue();
        let plane = ControlPlane::new(
            Arc::new(StateCache::new()),
            Arc::new(Journal::open(dir.path()).unwrap()),
            Arc::new(SubscriptionHub::default()),
            commands,
        );
        let api = Router::new(plane, drain).with_auth_token("s3cret").into_filter().unwrap();

        assert_eq!(call(&api, "GET", "/api/health", None).await.status(), 401);
        let resp = warp::test::request()
            .path("/api/health")
            .header("authorization", "Bearer s3cret")
            .reply(&api)
            .await;
        assert_eq!(resp.status(), 200);
    }

    #[tokio::test]
    async fn bare_options_skips_auth() {
        let (_dir, _plane, api) = api();
        let resp = warp::test::request().method("OPTIONS").path("/api/telemetry").reply(&api).await;
        assert_eq!(resp.status(), 204);
    }

    #[tokio::test]
    async fn cors_preflight_and_headers_for_dashboard_origin() {
        let (_dir, _plane, api) = api();
        let resp = warp::test::request()
            .method("OPTIONS")
            .path("/api/telemetry")
            .header("origin", DEFAULT_CORS_ORIGIN)
            .header("access-control-request-method", "POST")
            .header("access-control-request-headers", "authorization, content-type")
            .reply(&api)
            .await;
        assert!(resp.status().is_success(), "{}", resp.status());
        assert_eq!(resp.headers()["access-control-allow-origin"], DEFAULT_CORS_ORIGIN);

        let resp = authed("GET", "/api/health")
            .header("origin", DEFAULT_CORS_ORIGIN)
            .reply(&api)
            .await;
        assert_eq!(resp.status(), 200);
        assert_eq!(resp.headers()["access-control-allow-origin"], DEFAULT_CORS_ORIGIN);
    }

    #[test]
    fn cors_origin_must_be_well_formed() {
        assert!(cors_policy("http://localhost:5173").is_ok());
        assert!(cors_policy("https://dash.example.org").is_ok());
        assert!(cors_policy("*").is_ok());
        assert!(cors_policy("localhost:5173").is_err());
        assert!(cors_policy("http://").is_err());
        assert!(cors_policy("http://user@host").is_err());
    }

    #[tokio::test]
    async fn telemetry_then_state() {
        let (_dir, _plane, api) = api();
        let resp = call(
            &api,
            "POST",
            "/api/telemetry",
            Some(json!({"vehicle": {"id": "v1"}, "leak": true})),
        )
        .await;
        assert_eq!(resp.status(), 202);

        let resp = call(&api, "GET", "/api/state/v1", None).await;
        assert_eq!(resp.status(), 200);
        assert_eq!(body(&resp)["leak"], true);

        let resp = call(&api, "GET", "/api/state/v2", None).await;
        assert_eq!(resp.status(), 404);
        assert_eq!(body(&resp)["error"], "vehicle v2 not found");
    }

    #[tokio::test]
    async fn path_segments_are_percent_decoded() {
        let (_dir, _plane, api) = api();
        call(&api, "POST", "/api/telemetry", Some(json!({"vehicle": {"id": "boat 01"}}))).await;

        let resp = call(&api, "GET", "/api/state/boat%2001", None).await;
        assert_eq!(resp.status(), 200);
        assert_eq!(body(&resp)["vehicle"]["id"], "boat 01");
    }

    #[tokio::test]
    async fn invalid_telemetry_is_bad_request() {
        let (_dir, plane, api) = api();
        let resp = authed("POST", "/api/telemetry")
            .header("content-type", "application/json")
            .body("not json")
            .reply(&api)
            .await;
        assert_eq!(resp.status(), 400);
        assert_eq!(body(&resp)["error"], "Invalid payload");

        let resp = call(&api, "POST", "/api/telemetry", Some(json!({"leak": true}))).await;
        assert_eq!(resp.status(), 400);
        assert_eq!(body(&resp)["error"], "vehicle.id required");
        assert_eq!(plane.cache().vehicle_count(), 0);
    }

    #[tokio::test]
    async fn oversized_body_is_refused() {
        let (_dir, plane, api) = api();
        let padding = "x".repeat(MAX_BODY_BYTES as usize);
        let resp = call(
            &api,
            "POST",
            "/api/telemetry",
            Some(json!({"vehicle": {"id": "v1"}, "pad": padding})),
        )
        .await;
        assert_eq!(resp.status(), 413);
        assert_eq!(plane.cache().vehicle_count(), 0);
    }

    #[tokio::test]
    async fn command_round_trip_through_control_channel() {
        let (_dir, _plane, api) = api();
        assert_eq!(call(&api, "GET", "/api/commands/next", None).await.status(), 204);

        let resp = call(
            &api,
            "POST",
            "/api/commands",
            Some(json!({"vehicle_id": "v1", "command": "SET_MODE", "payload": {"mode": "MANUAL"}})),
        )
        .await;
        assert_eq!(resp.status(), 200);
        assert_eq!(body(&resp), json!({"enqueued": true}));

        let resp = call(&api, "GET", "/api/commands/next", None).await;
        assert_eq!(resp.status(), 200);
        let next = body(&resp);
        assert_eq!(next["command"], "SET_MODE");
        assert_eq!(next["payload"]["mode"], "MANUAL");
        assert_eq!(call(&api, "GET", "/api/commands/next", None).await.status(), 204);
    }

    #[tokio::test]
    async fn command_without_vehicle_is_rejected() {
        let (_dir, plane, api) = api();
        let resp = call(&api, "POST", "/api/commands", Some(json!({"command": "STOP"}))).await;
        assert_eq!(resp.status(), 400);
        assert_eq!(body(&resp)["error"], "vehicle_id required");
        assert_eq!(plane.pending_commands(), 0);
    }

    #[tokio::test]
    async fn mission_lifecycle() {
        let (_dir, _plane, api) = api();
        let resp = call(
            &api,
            "POST",
            "/api/missions",
            Some(json!({"task_id": "m1", "vehicle_id": "v1", "waypoints": [{"lat": 41.0}]})),
        )
        .await;
        assert_eq!(resp.status(), 200);
        assert_eq!(body(&resp)["mode"], "AUTONOMOUS");

        let resp = call(&api, "GET", "/api/missions/m1", None).await;
        assert_eq!(body(&resp)["waypoints"][0]["lat"], 41.0);

        let resp = call(&api, "POST", "/api/missions/m1/start", None).await;
        assert_eq!(resp.status(), 200);
        assert_eq!(body(&resp), json!({"ok": true, "action": "start"}));

        let resp = call(&api, "POST", "/api/missions/nope/start", None).await;
        assert_eq!(resp.status(), 404);
        assert_eq!(call(&api, "GET", "/api/missions/nope", None).await.status(), 404);
    }

    #[tokio::test]
    async fn health_reports_counters() {
        let (_dir, _plane, api) = api();
        call(&api, "POST", "/api/telemetry", Some(json!({"vehicle": {"id": "v1"}}))).await;
        call(&api, "POST", "/api/commands", Some(json!({"vehicle_id": "v1", "command": "STOP"}))).await;

        let resp = call(&api, "GET", "/api/health", None).await;
        assert_eq!(
            body(&resp),
            json!({"status": "ok", "vehicles": 1, "missions": 0, "pending_commands": 1})
        );
    }

    #[tokio::test]
    async fn unknown_routes_and_methods() {
        let (_dir, _plane, api) = api();
        assert_eq!(call(&api, "GET", "/api/nowhere", None).await.status(), 404);
        assert_eq!(call(&api, "GET", "/", None).await.status(), 404);
        assert_eq!(call(&api, "DELETE", "/api/telemetry", None).await.status(), 405);
        // A plain GET on the live stream lacks the upgrade headers.
        assert_eq!(call(&api, "GET", "/ws/telemetry/v1", None).await.status(), 400);
    }

    #[test]
    fn error_mapping() {
        assert_eq!(error_response(&FleetError::Validation("x".into())).status(), 400);
        assert_eq!(error_response(&FleetError::NotFound("x".into())).status(), 404);
        assert_eq!(
            error_response(&FleetError::Storage(std::io::Error::other("disk"))).status(),
            500
        );
        assert_eq!(error_response(&FleetError::Serialization("x".into())).status(), 500);
    }
}
