//! Authorizer
//!
//! A synchronous decision function over caller metadata and configuration;
//! no I/O, no async suspension.

use serde::Serialize;
use tracing::info;

use crate::config::{AuthorizationConfig, AuthorizationMode};
use crate::types::{CallId, CallerMetadata};

/// Machine-readable decision strategy, carried on the wire in `auth_response`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    Disabled,
    Open,
    Allowlist,
    TenantOnly,
    PstnBlocked,
    ValidationFailed,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Disabled => "disabled",
            Strategy::Open => "open",
            Strategy::Allowlist => "allowlist",
            Strategy::TenantOnly => "tenant-only",
            Strategy::PstnBlocked => "pstn-blocked",
            Strategy::ValidationFailed => "validation-failed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Decision {
    pub authorized: bool,
    pub strategy: Strategy,
    pub reason: Option<String>,
}

/// Evaluates an `auth_request` against the configured policy.
pub fn authorize(call_id: &CallId, metadata: &CallerMetadata, config: &AuthorizationConfig) -> Decision {
    let decision = authorize_inner(metadata, config);
    info!(
        call_id = %call_id,
        strategy = decision.strategy.as_str(),
        authorized = decision.authorized,
        "authorization decision"
    );
    decision
}

fn authorize_inner(metadata: &CallerMetadata, config: &AuthorizationConfig) -> Decision {
    if matches!(config.mode, AuthorizationMode::Disabled) {
        return deny(Strategy::Disabled, None);
    }

    let (Some(tenant_id), Some(user_id)) = (metadata.tenant_id.as_ref(), metadata.user_id.as_ref()) else {
        return deny(Strategy::ValidationFailed, Some("missing tenantId or userId".into()));
    };

    let pstn_present = metadata
        .phone_number
        .as_ref()
        .is_some_and(|p| !p.is_empty());
    if pstn_present && !config.allow_pstn {
        return deny(Strategy::PstnBlocked, Some("PSTN calls are not allowed".into()));
    }

    match config.mode {
        AuthorizationMode::Disabled => unreachable!("handled above"),
        AuthorizationMode::Open => allow(Strategy::Open, None),
        AuthorizationMode::Allowlist => {
            let upn = metadata.user_principal_name.as_deref().unwrap_or("");
            let user_id_lower = user_id.to_lowercase();
            let upn_lower = upn.to_lowercase();
            let matched = config
                .allow_from
                .iter()
                .any(|entry| {
                    let entry = entry.to_lowercase();
                    entry == user_id_lower || entry == upn_lower
                });
            if matched {
                allow(Strategy::Allowlist, None)
            } else {
                deny(Strategy::Allowlist, Some("userId not in allow-from".into()))
            }
        }
        AuthorizationMode::TenantOnly => {
            let tenant_lower = tenant_id.to_lowercase();
            let matched = config
                .allowed_tenants
                .iter()
                .any(|t| t.to_lowercase() == tenant_lower);
            if matched {
                allow(Strategy::TenantOnly, None)
            } else {
                deny(Strategy::TenantOnly, Some("tenantId not in allowed-tenants".into()))
            }
        }
    }
}

fn allow(strategy: Strategy, reason: Option<String>) -> Decision {
    Decision {
        authorized: true,
        strategy,
        reason,
    }
}

fn deny(strategy: Strategy, reason: Option<String>) -> Decision {
    Decision {
        authorized: false,
        strategy,
        reason,
    }
}
