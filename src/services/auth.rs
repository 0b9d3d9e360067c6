//! Built-in auth service
//!
//! Gives callers a way in: trade credentials for a token, inspect the
//! current identity, parse a token back into claims.

use serde_json::{json, Value};

use crate::service::options::OverrideOptions;
use crate::service::{CallValue, Service};

pub fn service() -> Service {
    Service::new("auth")
        .rpc(
            "whoami",
            OverrideOptions::new().force_res_object(false),
            |req| async move {
                let whoami = match &req.auth {
                    Some(auth) => auth.read().await.whoami(),
                    None => "nobody".to_string(),
                };
                Ok(CallValue::Value(json!(whoami)))
            },
        )
        .rpc(
            "authenticate",
            OverrideOptions::new().force_res_object(false),
            |req| async move {
                let auth = req
                    .auth
                    .clone()
                    .ok_or_else(|| crate::Error::Internal("auth session missing".into()))?;
                let tenant = req.arg_str(0).unwrap_or_default().to_string();
                let username = req.arg_str(1).unwrap_or_default().to_string();
                let password = req.arg_str(2).unwrap_or_default().to_string();

                let mut session = auth.write().await;
                session.login(&tenant, &username, &password).await?;
                let token = session
                    .token()
                    .map(|t| Value::String(t.to_string()))
                    .unwrap_or(Value::Null);
                Ok(CallValue::Value(token))
            },
        )
        .rpc(
            "parse_token",
            OverrideOptions::new().force_res_object(false),
            |req| async move {
                let auth = req
                    .auth
                    .clone()
                    .ok_or_else(|| crate::Error::Internal("auth session missing".into()))?;
                let token = req.arg_str(0).unwrap_or_default().to_string();
                let claims = auth.read().await.parse_token(&token);
                Ok(CallValue::Value(serde_json::to_value(claims)?))
            },
        )
}
