//! Service and operation model
//!
//! A `Service` is a named bundle of operations (RPC-, HTTP- and
//! timer-style). Operations carry their override options from registration
//! time; every invocation goes through the shim pipeline in
//! [`shim`](crate::service::shim) via the [`Dispatcher`].

pub mod dispatch;
pub mod options;
pub mod shim;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use serde_json::{Map, Value};

use crate::common::auth::{Auth, TOKEN_CONTEXT_KEY};
use crate::common::envelope::Envelope;
use crate::common::store::SharedStore;
use crate::common::utils::short_hostname;
use crate::service::options::OverrideOptions;
use crate::Result;

pub use dispatch::Dispatcher;
pub use options::StrOrList;

/// Shared auth session handle; the pipeline may swap the identity mid-call
pub type AuthHandle = Arc<tokio::sync::RwLock<Auth>>;

/// What an operation may return
#[derive(Debug, Clone)]
pub enum CallValue {
    /// The canonical envelope
    Envelope(Envelope),
    /// An HTTP-style reply; passes through response normalization untouched
    Http(HttpReply),
    /// A bare success flag
    Bool(bool),
    /// Any other payload
    Value(Value),
}

impl From<Envelope> for CallValue {
    fn from(envelope: Envelope) -> Self {
        CallValue::Envelope(envelope)
    }
}

impl From<Value> for CallValue {
    fn from(value: Value) -> Self {
        CallValue::Value(value)
    }
}

impl From<bool> for CallValue {
    fn from(flag: bool) -> Self {
        CallValue::Bool(flag)
    }
}

/// `(status, headers, body)` triple produced by HTTP-style operations
#[derive(Debug, Clone)]
pub struct HttpReply {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Value,
}

impl HttpReply {
    pub fn new(status: u16, body: impl Into<Value>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// Mutable per-call context data, shared between the pipeline and nested
/// dispatches (carries the caller's auth token, impersonated or not).
#[derive(Clone, Default)]
pub struct ContextData(Arc<std::sync::RwLock<HashMap<String, String>>>);

impl ContextData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_token(token: Option<String>) -> Self {
        let ctx = Self::new();
        if let Some(token) = token {
            ctx.insert(TOKEN_CONTEXT_KEY, token);
        }
        ctx
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.0.read().ok().and_then(|map| map.get(key).cloned())
    }

    pub fn insert(&self, key: &str, value: impl Into<String>) {
        if let Ok(mut map) = self.0.write() {
            map.insert(key.to_string(), value.into());
        }
    }

    /// The auth token entry, if any
    pub fn token(&self) -> Option<String> {
        self.get(TOKEN_CONTEXT_KEY)
    }
}

/// One invocation's inputs and dependencies
#[derive(Clone)]
pub struct CallRequest {
    pub args: Vec<Value>,
    pub kwargs: Map<String, Value>,
    pub context: ContextData,
    pub auth: Option<AuthHandle>,
    pub store: SharedStore,
    dispatcher: Option<Arc<Dispatcher>>,
}

impl CallRequest {
    pub fn new(store: SharedStore) -> Self {
        Self {
            args: Vec::new(),
            kwargs: Map::new(),
            context: ContextData::new(),
            auth: None,
            store,
            dispatcher: None,
        }
    }

    pub fn with_args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }

    pub fn with_kwargs(mut self, kwargs: Map<String, Value>) -> Self {
        self.kwargs = kwargs;
        self
    }

    pub fn with_context(mut self, context: ContextData) -> Self {
        self.context = context;
        self
    }

    pub fn with_auth(mut self, auth: AuthHandle) -> Self {
        self.auth = Some(auth);
        self
    }

    pub(crate) fn with_dispatcher(mut self, dispatcher: Arc<Dispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    pub fn arg(&self, index: usize) -> Option<&Value> {
        self.args.get(index)
    }

    pub fn arg_str(&self, index: usize) -> Option<&str> {
        self.arg(index).and_then(Value::as_str)
    }

    pub fn kwarg(&self, key: &str) -> Option<&Value> {
        self.kwargs.get(key)
    }

    pub fn kwarg_str(&self, key: &str) -> Option<&str> {
        self.kwarg(key).and_then(Value::as_str)
    }

    /// Invoke another operation, propagating this call's context data
    /// (nested calls inherit an impersonated identity).
    pub async fn dispatch(
        &self,
        service: &str,
        method: &str,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> Result<CallValue> {
        let dispatcher = self
            .dispatcher
            .clone()
            .ok_or_else(|| crate::Error::Internal("no dispatcher attached to call".into()))?;
        dispatcher
            .call(service, method, args, kwargs, self.context.clone())
            .await
    }
}

/// Boxed operation handler
pub type Handler = Arc<dyn Fn(CallRequest) -> BoxFuture<'static, Result<CallValue>> + Send + Sync>;

/// How an operation is exposed
#[derive(Debug, Clone, PartialEq)]
pub enum OperationKind {
    Rpc,
    Http { method: String, path: String },
    Timer { interval: Duration },
}

/// A callable exposed to external callers
#[derive(Clone)]
pub struct Operation {
    pub service: String,
    pub name: String,
    pub kind: OperationKind,
    pub options: OverrideOptions,
    handler: Handler,
}

impl Operation {
    pub fn service_id(&self) -> String {
        format!("{}.{}", self.service, self.name)
    }

    pub fn invoke(&self, request: CallRequest) -> BoxFuture<'static, Result<CallValue>> {
        (self.handler)(request)
    }
}

impl std::fmt::Debug for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Operation")
            .field("service", &self.service)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish()
    }
}

/// A named bundle of operations, optionally backed by a watchable file
#[derive(Clone)]
pub struct Service {
    pub name: String,
    pub source: Option<PathBuf>,
    pub operations: Vec<Arc<Operation>>,
}

impl Service {
    /// New service; every service exposes `is_service_available`.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let service = Self {
            name: name.clone(),
            source: None,
            operations: Vec::new(),
        };
        service.rpc("is_service_available", OverrideOptions::new(), move |_req| {
            let name = name.clone();
            async move {
                Ok(CallValue::Envelope(Envelope::success(serde_json::json!({
                    "message": format!("The {} service is available and responding!", name),
                    "server": short_hostname(),
                }))))
            }
        })
    }

    pub fn source(mut self, path: impl Into<PathBuf>) -> Self {
        self.source = Some(path.into());
        self
    }

    fn add<F, Fut>(mut self, name: &str, kind: OperationKind, options: OverrideOptions, f: F) -> Self
    where
        F: Fn(CallRequest) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<CallValue>> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |request| Box::pin(f(request)));
        self.operations.push(Arc::new(Operation {
            service: self.name.clone(),
            name: name.to_string(),
            kind,
            options,
            handler,
        }));
        self
    }

    /// Register an RPC-style operation
    pub fn rpc<F, Fut>(self, name: &str, options: OverrideOptions, f: F) -> Self
    where
        F: Fn(CallRequest) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<CallValue>> + Send + 'static,
    {
        self.add(name, OperationKind::Rpc, options, f)
    }

    /// Register an HTTP-style operation
    pub fn http<F, Fut>(
        self,
        method: &str,
        path: &str,
        name: &str,
        options: OverrideOptions,
        f: F,
    ) -> Self
    where
        F: Fn(CallRequest) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<CallValue>> + Send + 'static,
    {
        self.add(
            name,
            OperationKind::Http {
                method: method.to_uppercase(),
                path: path.to_string(),
            },
            options,
            f,
        )
    }

    /// Register a timer-style operation, ticked by the runner
    pub fn timer<F, Fut>(
        self,
        name: &str,
        interval: Duration,
        options: OverrideOptions,
        f: F,
    ) -> Self
    where
        F: Fn(CallRequest) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<CallValue>> + Send + 'static,
    {
        self.add(name, OperationKind::Timer { interval }, options, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::store::MemoryStore;
    use serde_json::json;

    #[test]
    fn test_service_has_availability_op() {
        let service = Service::new("demo");
        assert_eq!(service.operations.len(), 1);
        assert_eq!(service.operations[0].name, "is_service_available");
        assert_eq!(service.operations[0].kind, OperationKind::Rpc);
    }

    #[test]
    fn test_operation_service_id() {
        let service = Service::new("demo").rpc("ping", OverrideOptions::new(), |_req| async {
            Ok(CallValue::Bool(true))
        });
        assert_eq!(service.operations[1].service_id(), "demo.ping");
    }

    #[tokio::test]
    async fn test_invoke_handler_directly() {
        let service = Service::new("demo").rpc("echo", OverrideOptions::new(), |req| async move {
            Ok(CallValue::Value(req.arg(0).cloned().unwrap_or(Value::Null)))
        });
        let request =
            CallRequest::new(MemoryStore::shared()).with_args(vec![json!("hello")]);
        let op = &service.operations[1];
        match op.invoke(request).await.unwrap() {
            CallValue::Value(value) => assert_eq!(value, json!("hello")),
            other => panic!("unexpected value: {other:?}"),
        }
    }

    #[test]
    fn test_context_data_token() {
        let ctx = ContextData::from_token(Some("tok".to_string()));
        assert_eq!(ctx.token().as_deref(), Some("tok"));
        ctx.insert(TOKEN_CONTEXT_KEY, "tok2");
        assert_eq!(ctx.token().as_deref(), Some("tok2"));
    }
}
