//! HTTP endpoints for health checks, node info, post pages, and sync.

use anyhow::Result;
use axum::{
    body::Body,
    extract::{Path as UrlPath, Query as UrlQuery, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::{future::Future, net::SocketAddr, sync::Arc};

use crate::{error::Error, store::Store, sync::Syncer};

#[derive(Clone)]
pub struct HttpState {
    pub store: Store,
    pub syncer: Arc<Syncer>,
    pub domain: String,
    pub verbose: bool,
}

/// Response body for the `/healthz` endpoint.
#[derive(Serialize, Deserialize)]
struct Health {
    /// Always "ok" when the server is running.
    status: String,
}

/// Node self-description served at `/`.
#[derive(Serialize, Deserialize)]
struct NodeInfo {
    /// Domain owned by this node.
    name: String,
    /// Software identifier (here it is always "pantr").
    software: String,
    /// Semantic version string such as "0.1.0".
    version: String,
}

/// Start an HTTP server exposing the node's post and sync endpoints.
pub async fn serve_http(
    addr: SocketAddr,
    state: HttpState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let app = router(state);
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

fn router(state: HttpState) -> Router {
    Router::new()
        .route("/", get(node_info))
        .route("/healthz", get(healthz))
        .route("/posts", get(list_posts))
        .route("/sync", post(sync_remote))
        .route("/:slug", get(get_post))
        .with_state(Arc::new(state))
}

/// Health check endpoint.
async fn healthz(State(state): State<Arc<HttpState>>) -> Json<Health> {
    if state.verbose {
        println!("[http] GET /healthz");
    }
    Json(Health {
        status: "ok".to_string(),
    })
}

/// Basic node information document.
async fn node_info(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    if state.verbose {
        println!("[http] GET /");
    }
    (
        [(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")],
        Json(NodeInfo {
            name: state.domain.clone(),
            software: "pantr".into(),
            version: env!("CARGO_PKG_VERSION").into(),
        }),
    )
}

/// URL query parameters accepted by the `/posts` endpoint.
#[derive(Deserialize)]
struct ListParams {
    /// Single lowercase tag to filter on.
    tag: Option<String>,
    /// Only posts replying to this GUID.
    referencing: Option<String>,
    /// Maximum number of posts to return.
    limit: Option<usize>,
}

/// Local posts as NDJSON, newest first. This is the index peers poll.
async fn list_posts(
    State(state): State<Arc<HttpState>>,
    UrlQuery(params): UrlQuery<ListParams>,
) -> Response {
    let mut posts = state.store.all().unwrap_or_default();
    if let Some(tag) = &params.tag {
        let tag = tag.to_lowercase();
        posts.retain(|p| p.tags.contains(&tag));
    }
    if let Some(guid) = &params.referencing {
        posts.retain(|p| p.referenced_guid.as_deref() == Some(guid.as_str()));
    }
    posts.sort_by_key(|p| std::cmp::Reverse(p.created_at));
    if let Some(limit) = params.limit {
        posts.truncate(limit);
    }
    if state.verbose {
        println!("[http] GET /posts -> {} posts", posts.len());
    }
    // Newline-delimited JSON so clients can stream and parse incrementally.
    let body = posts
        .into_iter()
        .map(|p| serde_json::to_string(&p).unwrap())
        .collect::<Vec<_>>()
        .join("\n");
    Response::builder()
        .header("Content-Type", "application/x-ndjson")
        .body(Body::from(body))
        .unwrap()
}

/// URL query parameters accepted by the `/:slug` endpoint.
#[derive(Deserialize)]
struct PostParams {
    /// `json` requests the machine-readable representation.
    format: Option<String>,
}

/// Canonical representation of a post, addressed by its slug.
async fn get_post(
    State(state): State<Arc<HttpState>>,
    UrlPath(slug): UrlPath<String>,
    UrlQuery(params): UrlQuery<PostParams>,
) -> Response {
    if state.verbose {
        println!("[http] GET /{slug}");
    }
    let post = match state.store.find_by_slug(&slug) {
        Ok(Some(post)) => post,
        Ok(None) => return StatusCode::NOT_FOUND.into_response(),
        Err(e) => return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    };
    if params.format.as_deref() == Some("json") {
        Json(post).into_response()
    } else {
        Html(format!(
            "<!doctype html><html><head><title>{}</title></head>\
             <body><article>{}</article></body></html>",
            post.guid, post.body_html
        ))
        .into_response()
    }
}

/// URL query parameters accepted by the `/sync` endpoint.
#[derive(Deserialize)]
struct SyncParams {
    /// Remote post URL, `scheme://domain/slug[.json]`.
    url: String,
}

/// Pull one remote post through the synchronizer.
async fn sync_remote(
    State(state): State<Arc<HttpState>>,
    UrlQuery(params): UrlQuery<SyncParams>,
) -> Response {
    if state.verbose {
        println!("[http] POST /sync {}", params.url);
    }
    match state.syncer.sync(&params.url).await {
        Ok(post) => Json(post).into_response(),
        Err(e) => error_response(e),
    }
}

/// Map error kinds onto HTTP statuses for direct synchronizer callers.
fn error_response(e: Error) -> Response {
    let status = match &e {
        Error::MalformedUrl(_) => StatusCode::BAD_REQUEST,
        Error::Validation(_) | Error::Render(_) => StatusCode::UNPROCESSABLE_ENTITY,
        Error::CorruptData(_) | Error::Network(_) => StatusCode::BAD_GATEWAY,
        Error::Conflict { .. } => StatusCode::CONFLICT,
        Error::Io(_) | Error::Json(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, e.to_string()).into_response()
}
