//! HTTP surface of the server.
use crate::session::{session_scope, SessionTable};
use authgate::{AuthError, RequestScope, SharedAuthgate};
use axum::{
    extract::State,
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::get,
    Extension, Json, Router,
};
use serde_json::{json, Value};
use std::any::Any;
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};
use tracing::error;

/// Module routes under the mount path plus `/whoami`
pub fn build_router(authgate: SharedAuthgate, sessions: SessionTable) -> Router {
    let mut module_routes = Router::new();
    for (path, route) in authgate.route_table() {
        module_routes = module_routes.route(path, route);
    }

    let routes = Router::new().route("/whoami", get(whoami));
    let mount = authgate.settings().mount_path.trim_end_matches('/').to_string();
    let routes = if mount.is_empty() {
        routes.merge(module_routes)
    } else {
        routes.nest(&mount, module_routes)
    };

    with_layers(routes.with_state(authgate), sessions)
}

/// Session scope, panic barrier and request tracing
fn with_layers(router: Router, sessions: SessionTable) -> Router {
    router
        .layer(middleware::from_fn_with_state(sessions, session_scope))
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(TraceLayer::new_for_http())
}

fn handle_panic(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    error!(detail, "request handler panicked");

    let body = json!({
        "error": {
            "code": "PANIC_001",
            "message": "An internal server error occurred",
        }
    });
    (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
}

/// The signed-in user, or 401
async fn whoami(
    State(authgate): State<SharedAuthgate>,
    Extension(scope): Extension<RequestScope>,
) -> Result<Json<Value>, AuthError> {
    let user = authgate.require_current_user(&scope).await?;
    Ok(Json(json!({
        "pid": user.pid(),
        "email": user.email(),
        "confirmed": user.confirmed(),
    })))
}
