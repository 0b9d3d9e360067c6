//! Shim pipeline
//!
//! Every operation call is wrapped by a fixed, ordered set of shims:
//! Auth, Threading, Cache, ForceObject. Each shim is constructed fresh for
//! one invocation from that call's dependencies and the operation's
//! override options, runs its staged hooks, and is discarded with the
//! executor when the call completes.
//!
//! Stage order within one call is strict:
//! pre_call, pre_execute, alternate_execute, the real call, post_execute,
//! then post_call in reverse order. post_call always runs, even when an
//! earlier stage failed or stopped execution.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::common::auth::TOKEN_CONTEXT_KEY;
use crate::common::codec::{self, Decoded};
use crate::common::envelope::Envelope;
use crate::common::utils::content_hash;
use crate::service::options::StrOrList;
use crate::service::{AuthHandle, CallRequest, CallValue, Operation};
use crate::Result;

/// Failure reason used when a call or shim raises
pub const EXCEPTION_REASON: &str = "exception in the called service";

/// Mutable state owned by one executor for one invocation
pub struct ExecState {
    pub operation: Arc<Operation>,
    pub request: CallRequest,
    pub result: Option<CallValue>,
    pub stop_executing: bool,
}

impl ExecState {
    pub fn set_result(&mut self, result: CallValue, stop_executing: bool) {
        self.result = Some(result);
        self.stop_executing = stop_executing;
    }

    pub fn set_fail(&mut self, reason: &str) {
        self.result = Some(CallValue::Envelope(Envelope::fail(reason)));
        self.stop_executing = true;
    }

    /// Invoke the real operation
    pub async fn call(&self) -> Result<CallValue> {
        self.operation.invoke(self.request.clone()).await
    }
}

/// One cross-cutting behavior with staged hooks around an operation call
#[async_trait]
pub trait Shim: Send {
    fn name(&self) -> &'static str;

    fn enabled(&self) -> bool;

    async fn pre_call(&mut self, _state: &mut ExecState) -> Result<()> {
        Ok(())
    }

    async fn pre_execute(&mut self, _state: &mut ExecState) -> Result<()> {
        Ok(())
    }

    /// Substitute the real call; return true to claim the execution
    async fn alternate_execute(&mut self, _state: &mut ExecState) -> Result<bool> {
        Ok(false)
    }

    async fn post_execute(&mut self, _state: &mut ExecState) -> Result<()> {
        Ok(())
    }

    async fn post_call(&mut self, _state: &mut ExecState) -> Result<()> {
        Ok(())
    }

    /// Structured diagnostic fields merged into the call's log lines
    fn log_extra(&self) -> Vec<(&'static str, String)> {
        Vec::new()
    }
}

/// Ephemeral per-invocation coordinator
pub struct ShimExecutor {
    service_id: String,
    execution_id: String,
    shims: Vec<Box<dyn Shim>>,
    state: ExecState,
}

impl ShimExecutor {
    /// Build the fixed shim registry for one invocation.
    ///
    /// Registration order matters: Auth gates before Threading offloads or
    /// Cache serves a response; ForceObject normalizes last.
    pub fn new(operation: Arc<Operation>, request: CallRequest) -> Self {
        let state = ExecState {
            operation: operation.clone(),
            request,
            result: None,
            stop_executing: false,
        };
        let shims: Vec<Box<dyn Shim>> = vec![
            Box::new(AuthShim::new(&state)),
            Box::new(ThreadingShim::new(&state)),
            Box::new(CachingShim::new(&state)),
            Box::new(ForceObject::new(&state)),
        ];
        Self {
            service_id: operation.service_id(),
            execution_id: Uuid::new_v4().to_string(),
            shims,
            state,
        }
    }

    fn shim_lines(&self) -> String {
        let mut parts = Vec::new();
        for shim in &self.shims {
            if !shim.enabled() {
                continue;
            }
            let extras: Vec<String> = shim
                .log_extra()
                .into_iter()
                .map(|(key, value)| format!("{key}={value}"))
                .collect();
            if extras.is_empty() {
                parts.push(shim.name().to_string());
            } else {
                parts.push(format!("{}:{}", shim.name(), extras.join(",")));
            }
        }
        parts.join(" ")
    }

    /// Stages 2-5; any error here is recovered at the executor boundary
    async fn guarded_stages(&mut self) -> Result<()> {
        let ShimExecutor { shims, state, .. } = self;

        for shim in shims.iter_mut() {
            if state.stop_executing {
                break;
            }
            if shim.enabled() {
                shim.pre_execute(state).await?;
            }
        }

        for shim in shims.iter_mut() {
            if state.stop_executing || shim.alternate_execute(state).await? {
                break;
            }
        }
        if !state.stop_executing {
            let value = state.call().await?;
            state.result = Some(value);
        }

        for shim in shims.iter_mut() {
            if state.stop_executing {
                break;
            }
            if shim.enabled() {
                shim.post_execute(state).await?;
            }
        }

        Ok(())
    }

    /// Run the full pipeline and produce the final call value
    pub async fn apply(mut self) -> Result<CallValue> {
        tracing::info!(
            service = %self.service_id,
            execution = %self.execution_id,
            "Call to {} ({}) started",
            self.service_id,
            self.execution_id
        );

        {
            let ShimExecutor { shims, state, .. } = &mut self;
            for shim in shims.iter_mut() {
                if shim.enabled() {
                    shim.pre_call(state).await?;
                }
            }
        }

        if let Err(err) = self.guarded_stages().await {
            tracing::error!(
                service = %self.service_id,
                execution = %self.execution_id,
                error = %err,
                "service raised an exception!"
            );
            self.state.result = Some(CallValue::Envelope(Envelope::fail(EXCEPTION_REASON)));
        }

        {
            let ShimExecutor { shims, state, .. } = &mut self;
            for shim in shims.iter_mut().rev() {
                if shim.enabled() {
                    shim.post_call(state).await?;
                }
            }
        }

        tracing::info!(
            service = %self.service_id,
            execution = %self.execution_id,
            "Call to {} ({}) ended: ({})",
            self.service_id,
            self.execution_id,
            self.shim_lines()
        );

        Ok(self.state.result.unwrap_or(CallValue::Value(Value::Null)))
    }
}

// === Auth ===

/// Gates access and handles identity impersonation
pub struct AuthShim {
    enabled: bool,
    check_auth: bool,
    require_auth: bool,
    require_role: Option<StrOrList>,
    require_tenant: Option<StrOrList>,
    sudo: Option<StrOrList>,
    auth: Option<AuthHandle>,
}

impl AuthShim {
    pub fn new(state: &ExecState) -> Self {
        let options = &state.operation.options;
        let check_auth = options.require_auth
            || options.require_role.is_some()
            || options.require_tenant.is_some();
        Self {
            enabled: options.sudo.is_some() || check_auth,
            check_auth,
            require_auth: options.require_auth,
            require_role: options.require_role.clone(),
            require_tenant: options.require_tenant.clone(),
            sudo: options.sudo.clone(),
            auth: state.request.auth.clone(),
        }
    }
}

#[async_trait]
impl Shim for AuthShim {
    fn name(&self) -> &'static str {
        "auth"
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    async fn pre_call(&mut self, state: &mut ExecState) -> Result<()> {
        if let (Some(sudo), Some(auth)) = (&self.sudo, &self.auth) {
            let parts = sudo.to_vec();
            let tenant = parts.first().cloned().unwrap_or_default();
            let username = parts.get(1).map(String::as_str).unwrap_or("SYSTEM");
            let roles: Vec<String> = parts.get(2..).unwrap_or(&[]).to_vec();

            let token = auth.read().await.forge_token(&tenant, username, &roles)?;
            auth.write().await.assume(&token);
            state.request.context.insert(TOKEN_CONTEXT_KEY, token);
        }

        if !self.check_auth {
            return Ok(());
        }

        let mut issues: Vec<&'static str> = Vec::new();
        match &self.auth {
            None => {
                issues.push("NOOBJ");
                state.set_fail("authentication required");
            }
            Some(auth) => {
                let auth = auth.read().await;
                if self.require_auth && !auth.authenticated() {
                    issues.push("NOAUTH");
                }
                if let Some(require_role) = &self.require_role {
                    let wanted = require_role.to_vec();
                    let held = auth.roles();
                    if !wanted.iter().any(|role| held.contains(role)) {
                        issues.push("MROLES");
                    }
                }
                if let Some(require_tenant) = &self.require_tenant {
                    if !require_tenant.equals_scalar(auth.tenant_id()) {
                        issues.push("WTENANT");
                    }
                }
                if !issues.is_empty() {
                    state.set_fail("permission denied");
                }
            }
        }

        if !issues.is_empty() {
            tracing::error!("authentication failure in service: {}", issues.join(","));
        }

        Ok(())
    }

    fn log_extra(&self) -> Vec<(&'static str, String)> {
        let (tenant, user, authenticated) = match &self.auth {
            Some(auth) => match auth.try_read() {
                Ok(auth) => (
                    auth.tenant_id().unwrap_or("None").to_string(),
                    auth.username().unwrap_or("None").to_string(),
                    u8::from(auth.authenticated()),
                ),
                Err(_) => ("None".to_string(), "None".to_string(), 0),
            },
            None => ("None".to_string(), "None".to_string(), 0),
        };
        vec![
            ("tenant", tenant),
            ("user", user),
            ("authenticated", authenticated.to_string()),
        ]
    }
}

// === Threading ===

/// Runs the real call on an isolated blocking thread so a long computation
/// does not starve other calls sharing the cooperative scheduler.
pub struct ThreadingShim {
    enabled: bool,
}

impl ThreadingShim {
    pub fn new(state: &ExecState) -> Self {
        Self {
            enabled: state.operation.options.threaded,
        }
    }
}

#[async_trait]
impl Shim for ThreadingShim {
    fn name(&self) -> &'static str {
        "thread"
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    async fn alternate_execute(&mut self, state: &mut ExecState) -> Result<bool> {
        if !self.enabled {
            return Ok(false);
        }

        let future = state.operation.invoke(state.request.clone());
        let handle = tokio::runtime::Handle::current();
        let value = tokio::task::spawn_blocking(move || handle.block_on(future))
            .await
            .map_err(|err| crate::Error::Internal(format!("threaded call failed: {err}")))??;
        state.set_result(value, true);
        Ok(true)
    }

    fn log_extra(&self) -> Vec<(&'static str, String)> {
        vec![("threaded", u8::from(self.enabled).to_string())]
    }
}

// === Caching ===

/// Serves and stores responses keyed by full call identity
pub struct CachingShim {
    enabled: bool,
    cache_time: u64,
    cache_key: Option<String>,
    retrieved: bool,
    stored: bool,
}

impl CachingShim {
    pub fn new(state: &ExecState) -> Self {
        let options = &state.operation.options;
        let enabled = options.cache_time > 0 || options.cache_allow_override;

        let cache_key = if enabled {
            let (username, tenant_id) = match &state.request.auth {
                Some(auth) => match auth.try_read() {
                    Ok(auth) => (
                        auth.username().map(str::to_string),
                        auth.tenant_id().map(str::to_string),
                    ),
                    Err(_) => (None, None),
                },
                None => (None, None),
            };
            let identity = json!({
                "service_id": state.operation.service_id(),
                "args": state.request.args,
                "kwargs": state.request.kwargs,
                "username": username,
                "tenant_id": tenant_id,
            });
            let call_hash = content_hash(codec::dumps(&identity).as_bytes());
            Some(format!("cache:{}:{}", state.operation.service, call_hash))
        } else {
            None
        };

        Self {
            enabled,
            cache_time: options.cache_time,
            cache_key,
            retrieved: false,
            stored: false,
        }
    }
}

#[async_trait]
impl Shim for CachingShim {
    fn name(&self) -> &'static str {
        "cache"
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    async fn pre_call(&mut self, state: &mut ExecState) -> Result<()> {
        let Some(key) = &self.cache_key else {
            return Ok(());
        };
        if let Some(cached) = state.request.store.get_json(&format!("{key}:data")).await? {
            let value = match codec::decode(cached) {
                Decoded::Envelope(envelope) => CallValue::Envelope(envelope),
                Decoded::Other(other) => CallValue::Value(other),
            };
            state.set_result(value, true);
            self.retrieved = true;
        }
        Ok(())
    }

    async fn post_execute(&mut self, state: &mut ExecState) -> Result<()> {
        if self.retrieved || self.cache_time == 0 {
            return Ok(());
        }
        let Some(key) = &self.cache_key else {
            return Ok(());
        };

        let encoded = match &state.result {
            Some(CallValue::Envelope(envelope)) => codec::encode_envelope(envelope),
            Some(CallValue::Value(value)) => value.clone(),
            Some(CallValue::Bool(flag)) => Value::Bool(*flag),
            // HTTP replies are not cacheable
            Some(CallValue::Http(_)) | None => return Ok(()),
        };

        self.stored = true;
        let data_key = format!("{key}:data");
        state.request.store.set_json(&data_key, &encoded).await?;
        state.request.store.expire(&data_key, self.cache_time).await?;
        Ok(())
    }

    fn log_extra(&self) -> Vec<(&'static str, String)> {
        vec![
            ("from_cache", u8::from(self.retrieved).to_string()),
            ("to_cache", u8::from(self.stored).to_string()),
        ]
    }
}

// === ForceObject ===

/// Normalizes whatever the pipeline produced into a uniform envelope
pub struct ForceObject {
    enabled: bool,
}

impl ForceObject {
    pub fn new(state: &ExecState) -> Self {
        Self {
            enabled: state.operation.options.force_res_object,
        }
    }
}

#[async_trait]
impl Shim for ForceObject {
    fn name(&self) -> &'static str {
        "forceobj"
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    async fn post_call(&mut self, state: &mut ExecState) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        let wrapped = match state.result.take() {
            Some(done @ (CallValue::Envelope(_) | CallValue::Http(_))) => done,
            Some(CallValue::Bool(flag)) => CallValue::Envelope(Envelope::from_flag(flag)),
            Some(CallValue::Value(Value::Null)) | None => {
                CallValue::Envelope(Envelope::from_flag(true))
            }
            Some(CallValue::Value(value)) => {
                CallValue::Envelope(Envelope::success(value))
            }
        };
        state.result = Some(wrapped);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::store::MemoryStore;
    use crate::service::options::OverrideOptions;
    use crate::service::Service;

    fn demo_op(options: OverrideOptions) -> Arc<Operation> {
        let service = Service::new("demo").rpc("op", options, |_req| async {
            Ok(CallValue::Value(json!(7)))
        });
        service.operations.last().unwrap().clone()
    }

    #[test]
    fn test_auth_shim_disabled_without_requirements() {
        let op = demo_op(OverrideOptions::new());
        let state = ExecState {
            operation: op,
            request: CallRequest::new(MemoryStore::shared()),
            result: None,
            stop_executing: false,
        };
        assert!(!AuthShim::new(&state).enabled());
        assert!(!ThreadingShim::new(&state).enabled());
        assert!(!CachingShim::new(&state).enabled());
        assert!(ForceObject::new(&state).enabled());
    }

    #[test]
    fn test_cache_key_is_deterministic() {
        let op = demo_op(OverrideOptions::new().cache_time(10));
        let request = CallRequest::new(MemoryStore::shared()).with_args(vec![json!(1)]);
        let state = ExecState {
            operation: op.clone(),
            request: request.clone(),
            result: None,
            stop_executing: false,
        };
        let other = ExecState {
            operation: op,
            request,
            result: None,
            stop_executing: false,
        };
        let a = CachingShim::new(&state).cache_key.unwrap();
        let b = CachingShim::new(&other).cache_key.unwrap();
        assert_eq!(a, b);
        assert!(a.starts_with("cache:demo:"));
    }

    #[test]
    fn test_cache_key_varies_by_args() {
        let op = demo_op(OverrideOptions::new().cache_time(10));
        let state_one = ExecState {
            operation: op.clone(),
            request: CallRequest::new(MemoryStore::shared()).with_args(vec![json!(1)]),
            result: None,
            stop_executing: false,
        };
        let state_two = ExecState {
            operation: op,
            request: CallRequest::new(MemoryStore::shared()).with_args(vec![json!(2)]),
            result: None,
            stop_executing: false,
        };
        assert_ne!(
            CachingShim::new(&state_one).cache_key,
            CachingShim::new(&state_two).cache_key
        );
    }

    #[tokio::test]
    async fn test_executor_wraps_plain_value() {
        let op = demo_op(OverrideOptions::new());
        let request = CallRequest::new(MemoryStore::shared());
        let value = ShimExecutor::new(op, request).apply().await.unwrap();
        match value {
            CallValue::Envelope(envelope) => {
                assert!(envelope.succeeded());
                assert_eq!(envelope.data, Some(json!(7)));
            }
            other => panic!("expected envelope, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_executor_recovers_handler_error() {
        let service = Service::new("demo").rpc("boom", OverrideOptions::new(), |_req| async {
            Err(crate::Error::Internal("kaboom".into()))
        });
        let op = service.operations.last().unwrap().clone();
        let value = ShimExecutor::new(op, CallRequest::new(MemoryStore::shared()))
            .apply()
            .await
            .unwrap();
        match value {
            CallValue::Envelope(envelope) => {
                assert!(!envelope.succeeded());
                assert_eq!(envelope.reason.as_deref(), Some(EXCEPTION_REASON));
            }
            other => panic!("expected envelope, got {other:?}"),
        }
    }
}
