//! Built-in services registered by the node binary

pub mod auth;
pub mod confirm;

use crate::service::Service;

/// The node's default service set. `no_auth` drops the auth service.
pub fn builtin_services(no_auth: bool) -> Vec<Service> {
    let mut services = Vec::new();
    if !no_auth {
        services.push(auth::service());
    }
    services.push(confirm::service());
    services
}
