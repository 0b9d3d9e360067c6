//! Per-operation override options
//!
//! Attached to an operation at registration time and read-only afterwards;
//! the shim pipeline consults them to decide which shims activate.

use serde::{Deserialize, Serialize};

/// A knob that accepts either a single value or a list
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum StrOrList {
    One(String),
    Many(Vec<String>),
}

impl StrOrList {
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            StrOrList::One(value) => vec![value.clone()],
            StrOrList::Many(values) => values.clone(),
        }
    }

    /// Literal scalar equality: a `Many` value never equals a scalar, so a
    /// multi-element list configured here matches nothing.
    pub fn equals_scalar(&self, candidate: Option<&str>) -> bool {
        match (self, candidate) {
            (StrOrList::One(value), Some(candidate)) => value == candidate,
            _ => false,
        }
    }
}

impl From<&str> for StrOrList {
    fn from(value: &str) -> Self {
        StrOrList::One(value.to_string())
    }
}

impl From<Vec<&str>> for StrOrList {
    fn from(values: Vec<&str>) -> Self {
        StrOrList::Many(values.into_iter().map(str::to_string).collect())
    }
}

/// Cross-cutting behavior overrides for one operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverrideOptions {
    /// Only authenticated callers may invoke
    #[serde(default)]
    pub require_auth: bool,
    /// Caller must hold at least one of these roles
    #[serde(default)]
    pub require_role: Option<StrOrList>,
    /// Caller's tenant must equal this value
    #[serde(default)]
    pub require_tenant: Option<StrOrList>,
    /// Normalize the final result into an envelope
    #[serde(default = "default_true")]
    pub force_res_object: bool,
    /// Cache responses for this many seconds; 0 disables
    #[serde(default)]
    pub cache_time: u64,
    #[serde(default)]
    pub cache_allow_override: bool,
    /// Run the call on an isolated blocking thread
    #[serde(default)]
    pub threaded: bool,
    /// Only the cluster master runs this operation's timer ticks
    #[serde(default)]
    pub master_only: bool,
    /// Impersonate this identity (tenant, optional username, roles...)
    #[serde(default)]
    pub sudo: Option<StrOrList>,
}

fn default_true() -> bool {
    true
}

impl Default for OverrideOptions {
    fn default() -> Self {
        Self {
            require_auth: false,
            require_role: None,
            require_tenant: None,
            force_res_object: true,
            cache_time: 0,
            cache_allow_override: false,
            threaded: false,
            master_only: false,
            sudo: None,
        }
    }
}

impl OverrideOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn require_auth(mut self) -> Self {
        self.require_auth = true;
        self
    }

    pub fn require_role(mut self, role: impl Into<StrOrList>) -> Self {
        self.require_role = Some(role.into());
        self
    }

    pub fn require_tenant(mut self, tenant: impl Into<StrOrList>) -> Self {
        self.require_tenant = Some(tenant.into());
        self
    }

    pub fn force_res_object(mut self, force: bool) -> Self {
        self.force_res_object = force;
        self
    }

    pub fn cache_time(mut self, secs: u64) -> Self {
        self.cache_time = secs;
        self
    }

    pub fn cache_allow_override(mut self) -> Self {
        self.cache_allow_override = true;
        self
    }

    pub fn threaded(mut self) -> Self {
        self.threaded = true;
        self
    }

    pub fn master_only(mut self) -> Self {
        self.master_only = true;
        self
    }

    pub fn sudo(mut self, identity: impl Into<StrOrList>) -> Self {
        self.sudo = Some(identity.into());
        self
    }
}
