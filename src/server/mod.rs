//! HTTP server: river and stats endpoints, hub callbacks, and on-demand
//! actions. Every handler goes through the [`AggregatorHandle`].
//!
//! # Endpoints
//!
//! - `GET /version`, `GET /now`
//! - `GET /stats`, `/feedstats`, `/getlistnames`: JSON documents
//! - `GET /getfeedriver?url=`, `/getonefeed?url=`, `/getoneriver?fname=`
//! - `GET /ping?url=`, `/renewfeed?url=`, `/buildallrivers`, `/loadlists`,
//!   `/readallnow`
//! - `GET|POST /feedupdated`: rssCloud challenge and update notifications

pub mod ws;

use std::sync::Arc;

use axum::extract::{Form, Query, Request, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{StatusCode, Uri};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use chrono::Local;
use serde::Deserialize;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::aggregator::Query as AggregatorQuery;
use crate::app::{Result, RiverbedError};
use crate::cloud::NOTIFY_PATH;
use crate::config::Config;
use crate::daemon::AggregatorHandle;

const JSON: &str = "application/json";
const JAVASCRIPT: &str = "application/javascript";

#[derive(Clone)]
pub struct ServerState {
    inner: Arc<ServerStateInner>,
}

struct ServerStateInner {
    handle: AggregatorHandle,
    enabled: bool,
    aggregator_name: String,
}

impl ServerState {
    pub fn new(handle: AggregatorHandle, config: &Config) -> Self {
        Self {
            inner: Arc::new(ServerStateInner {
                handle,
                enabled: config.enabled,
                aggregator_name: Config::aggregator_name(),
            }),
        }
    }

    pub fn handle(&self) -> &AggregatorHandle {
        &self.inner.handle
    }
}

/// Failure talking to the aggregator task.
pub struct ServerError(RiverbedError);

impl From<RiverbedError> for ServerError {
    fn from(e: RiverbedError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        (StatusCode::SERVICE_UNAVAILABLE, self.0.to_string()).into_response()
    }
}

type HandlerResult = std::result::Result<Response, ServerError>;

#[derive(Debug, Deserialize)]
pub struct UrlParam {
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct FnameParam {
    fname: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChallengeParam {
    challenge: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateForm {
    url: Option<String>,
}

pub fn build_router(state: ServerState) -> Router {
    Router::new()
        .route("/version", get(version))
        .route("/now", get(now))
        .route("/stats", get(stats))
        .route("/feedstats", get(feed_stats))
        .route("/getlistnames", get(list_names))
        .route("/getfeedriver", get(feed_river))
        .route("/getoneriver", get(one_river))
        .route("/getonefeed", get(one_feed))
        .route("/ping", get(ping))
        .route("/renewfeed", get(renew_feed))
        .route("/buildallrivers", get(build_all_rivers))
        .route("/loadlists", get(load_lists))
        .route("/readallnow", get(read_all_now))
        .route(NOTIFY_PATH, get(feed_updated_challenge).post(feed_updated))
        .fallback(not_found)
        .layer(middleware::from_fn_with_state(state.clone(), count_hit))
        .with_state(state)
}

/// Serve the HTTP endpoints on `listener` until the task is dropped.
pub async fn serve(listener: TcpListener, state: ServerState) -> Result<()> {
    info!(addr = ?listener.local_addr().ok(), "HTTP server listening");
    axum::serve(listener, build_router(state)).await?;
    Ok(())
}

async fn count_hit(State(state): State<ServerState>, request: Request, next: Next) -> Response {
    debug!(method = %request.method(), uri = %request.uri(), "HTTP request");
    if let Err(e) = state.handle().record_hit().await {
        debug!("Hit not counted: {}", e);
    }
    next.run(request).await
}

fn text(body: impl Into<String>) -> Response {
    body.into().into_response()
}

fn typed(content_type: &'static str, body: String) -> Response {
    ([(CONTENT_TYPE, content_type)], body).into_response()
}

fn missing_param(name: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        format!("Can't do it because the \"{}\" param was not specified.", name),
    )
        .into_response()
}

async fn query_json(state: &ServerState, query: AggregatorQuery) -> HandlerResult {
    Ok(match state.handle().query(query).await? {
        Some(json) => typed(JSON, json),
        None => StatusCode::NOT_FOUND.into_response(),
    })
}

async fn version(State(state): State<ServerState>) -> Response {
    text(state.inner.aggregator_name.clone())
}

async fn now() -> Response {
    text(Local::now().to_rfc2822())
}

async fn stats(State(state): State<ServerState>) -> HandlerResult {
    query_json(&state, AggregatorQuery::Stats).await
}

async fn feed_stats(State(state): State<ServerState>) -> HandlerResult {
    query_json(&state, AggregatorQuery::FeedStats).await
}

async fn list_names(State(state): State<ServerState>) -> HandlerResult {
    query_json(&state, AggregatorQuery::ListNames).await
}

async fn feed_river(State(state): State<ServerState>, Query(param): Query<UrlParam>) -> HandlerResult {
    match param.url {
        Some(url) => query_json(&state, AggregatorQuery::FeedRiver(url)).await,
        None => Ok(missing_param("url")),
    }
}

async fn one_feed(State(state): State<ServerState>, Query(param): Query<UrlParam>) -> HandlerResult {
    match param.url {
        Some(url) => query_json(&state, AggregatorQuery::OneFeed(url)).await,
        None => Ok(missing_param("url")),
    }
}

async fn one_river(
    State(state): State<ServerState>,
    Query(param): Query<FnameParam>,
) -> HandlerResult {
    let Some(fname) = param.fname else {
        return Ok(missing_param("fname"));
    };
    Ok(match state.handle().query(AggregatorQuery::OneRiver(fname)).await? {
        Some(js) => typed(JAVASCRIPT, js),
        None => StatusCode::NOT_FOUND.into_response(),
    })
}

async fn ping(State(state): State<ServerState>, Query(param): Query<UrlParam>) -> HandlerResult {
    Ok(text(state.handle().ping(param.url).await?))
}

async fn renew_feed(State(state): State<ServerState>, Query(param): Query<UrlParam>) -> HandlerResult {
    match param.url {
        Some(url) => Ok(text(state.handle().renew_now(&url).await?)),
        None => Ok(missing_param("url")),
    }
}

async fn build_all_rivers(State(state): State<ServerState>) -> HandlerResult {
    if !state.inner.enabled {
        return Ok(text(
            "Can't build the rivers because config.enabled is false.",
        ));
    }
    state.handle().build_all_rivers().await?;
    Ok(text("Your rivers are building sir or madam."))
}

async fn load_lists(State(state): State<ServerState>) -> HandlerResult {
    state.handle().load_lists().await?;
    Ok(text("We're reading the lists, right now, as we speak."))
}

async fn read_all_now(State(state): State<ServerState>) -> HandlerResult {
    let count = state.handle().read_all_now().await?;
    Ok(text(format!("Reading {} feeds, one at a time.", count)))
}

async fn feed_updated_challenge(Query(param): Query<ChallengeParam>) -> Response {
    text(param.challenge.unwrap_or_default())
}

/// Hubs always get a thank-you, whatever the body held.
async fn feed_updated(State(state): State<ServerState>, form: Option<Form<UpdateForm>>) -> Response {
    match form.and_then(|Form(form)| form.url) {
        Some(url) => {
            if let Err(e) = state.handle().feed_updated(&url).await {
                warn!(feed = %url, "Couldn't pass on cloud update: {}", e);
            }
        }
        None => debug!("Cloud update without a url"),
    }
    text("Thanks for the update! :-)")
}

async fn not_found(uri: Uri) -> Response {
    (
        StatusCode::NOT_FOUND,
        format!(
            "\"{}\" is not one of the endpoints defined by this server.",
            uri.path()
        ),
    )
        .into_response()
}
