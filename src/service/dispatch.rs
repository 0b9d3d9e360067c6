//! Operation dispatch and the HTTP surface
//!
//! The dispatcher owns the operation registry. Every call, whether it
//! arrives over HTTP or from another operation, is wrapped in a fresh
//! [`ShimExecutor`](crate::service::shim::ShimExecutor).

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, Query, RawPathParams};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use axum::routing::{on, post, MethodFilter};
use axum::Router;
use serde_json::{json, Map, Value};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::common::auth::Auth;
use crate::common::codec;
use crate::common::envelope::Envelope;
use crate::common::store::SharedStore;
use crate::service::shim::ShimExecutor;
use crate::service::{CallRequest, CallValue, ContextData, Operation, OperationKind, Service};
use crate::Result;

/// Maximum accepted HTTP request body
const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Header callers use to pass their auth token
pub const AUTH_TOKEN_HEADER: &str = "x-auth-token";

/// Name-indexed operation registry
pub struct Dispatcher {
    operations: HashMap<String, Arc<Operation>>,
    store: SharedStore,
    secret: Option<String>,
}

impl Dispatcher {
    pub fn new(store: SharedStore, secret: Option<String>) -> Self {
        Self {
            operations: HashMap::new(),
            store,
            secret,
        }
    }

    /// Register every operation a service exposes
    pub fn register(&mut self, service: &Service) {
        for operation in &service.operations {
            tracing::debug!("registering operation {}", operation.service_id());
            self.operations
                .insert(operation.service_id(), operation.clone());
        }
    }

    pub fn operation(&self, service: &str, method: &str) -> Option<Arc<Operation>> {
        self.operations.get(&format!("{service}.{method}")).cloned()
    }

    /// All registered operations, sorted by service id
    pub fn operations(&self) -> Vec<Arc<Operation>> {
        let mut ops: Vec<_> = self.operations.values().cloned().collect();
        ops.sort_by_key(|op| op.service_id());
        ops
    }

    /// Timer operations, ticked by the runner
    pub fn timer_operations(&self) -> Vec<Arc<Operation>> {
        self.operations()
            .into_iter()
            .filter(|op| matches!(op.kind, OperationKind::Timer { .. }))
            .collect()
    }

    /// Invoke one operation through the shim pipeline.
    ///
    /// The auth session is built from the context data's token; context
    /// data is shared with the executor so impersonation propagates to
    /// nested dispatches.
    pub async fn call(
        self: &Arc<Self>,
        service: &str,
        method: &str,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
        context: ContextData,
    ) -> Result<CallValue> {
        let operation = self
            .operation(service, method)
            .ok_or_else(|| crate::Error::NotFound(format!("{service}.{method}")))?;

        let auth = Auth::from_context(self.store.clone(), self.secret.clone(), context.token()).await;
        let request = CallRequest::new(self.store.clone())
            .with_args(args)
            .with_kwargs(kwargs)
            .with_context(context)
            .with_auth(Arc::new(tokio::sync::RwLock::new(auth)))
            .with_dispatcher(self.clone());

        ShimExecutor::new(operation, request).apply().await
    }

    /// Build the HTTP router: one route per HTTP operation plus the
    /// generic RPC endpoint.
    pub fn router(self: &Arc<Self>) -> Router {
        let mut router = Router::new();

        for operation in self.operations() {
            let OperationKind::Http { method, path } = &operation.kind else {
                continue;
            };
            let filter = method_filter(method);
            let path = path.clone();
            let dispatcher = self.clone();
            let op = operation.clone();

            let handler = move |params: RawPathParams,
                                Query(query): Query<HashMap<String, String>>,
                                headers: HeaderMap,
                                body: String| async move {
                let mut kwargs = Map::new();
                for (name, value) in &params {
                    kwargs.insert(name.to_string(), Value::String(value.to_string()));
                }
                for (name, value) in query {
                    kwargs.insert(name, Value::String(value));
                }
                if !body.is_empty() {
                    kwargs.insert("body".to_string(), Value::String(body));
                }

                let context = ContextData::from_token(header_token(&headers));
                let outcome = dispatcher
                    .call(&op.service, &op.name, Vec::new(), kwargs, context)
                    .await;
                render_response(outcome)
            };

            router = router.route(&path, on(filter, handler));
        }

        let dispatcher = self.clone();
        let rpc = move |Path((service, method)): Path<(String, String)>,
                        headers: HeaderMap,
                        body: String| async move {
            let (args, kwargs) = parse_rpc_body(&body);
            let context = ContextData::from_token(header_token(&headers));
            let outcome = dispatcher.call(&service, &method, args, kwargs, context).await;
            render_response(outcome)
        };
        router = router.route("/rpc/:service/:method", post(rpc));

        router
            .layer(TraceLayer::new_for_http())
            .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
    }
}

fn method_filter(method: &str) -> MethodFilter {
    match method {
        "GET" => MethodFilter::GET,
        "POST" => MethodFilter::POST,
        "PUT" => MethodFilter::PUT,
        "DELETE" => MethodFilter::DELETE,
        "PATCH" => MethodFilter::PATCH,
        "HEAD" => MethodFilter::HEAD,
        "OPTIONS" => MethodFilter::OPTIONS,
        other => {
            tracing::warn!("unknown HTTP method {}, registering as GET", other);
            MethodFilter::GET
        }
    }
}

fn header_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(AUTH_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

/// RPC body: `{"args": [...], "kwargs": {...}}`; anything else is empty
fn parse_rpc_body(body: &str) -> (Vec<Value>, Map<String, Value>) {
    let parsed: Value = serde_json::from_str(body).unwrap_or(Value::Null);
    let args = parsed
        .get("args")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let kwargs = parsed
        .get("kwargs")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    (args, kwargs)
}

/// Render a call outcome as `(status, headers, body)`.
///
/// Envelopes and bare values render as indented, key-sorted JSON; every
/// body ends with a newline.
pub fn render_response(outcome: Result<CallValue>) -> Response {
    match outcome {
        Ok(CallValue::Http(reply)) => {
            let status = StatusCode::from_u16(reply.status).unwrap_or(StatusCode::OK);
            let (body, content_type) = match reply.body {
                Value::String(text) => (ensure_newline(text), "text/plain; charset=utf-8"),
                other => (codec::dumps(&other), "application/json"),
            };
            let mut builder = Response::builder()
                .status(status)
                .header(CONTENT_TYPE, content_type);
            for (name, value) in reply.headers {
                builder = builder.header(name, value);
            }
            builder
                .body(Body::from(body))
                .unwrap_or_else(|_| plain_response(StatusCode::INTERNAL_SERVER_ERROR, "render failed\n"))
        }
        Ok(CallValue::Envelope(envelope)) => json_response(StatusCode::OK, envelope.render()),
        Ok(CallValue::Value(value)) => json_response(StatusCode::OK, codec::dumps(&value)),
        Ok(CallValue::Bool(flag)) => json_response(StatusCode::OK, codec::dumps(&json!(flag))),
        Err(err) => json_response(
            err.to_http_status(),
            Envelope::fail(err.to_string()).render(),
        ),
    }
}

fn ensure_newline(mut text: String) -> String {
    if !text.ends_with('\n') {
        text.push('\n');
    }
    text
}

fn json_response(status: StatusCode, body: String) -> Response {
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(body))
        .unwrap_or_else(|_| plain_response(StatusCode::INTERNAL_SERVER_ERROR, "render failed\n"))
}

fn plain_response(status: StatusCode, body: &'static str) -> Response {
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    response
}
