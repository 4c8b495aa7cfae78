// Audit policy enforcement - explicit per-resource allow/reject decisions

use crate::core::models::{AuditPolicy, ValidationContext, ValidationResult};
use crate::mcp::extractor;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

pub const AUDIT_POLICY_ID: &str = "AuditPolicy";

/// Evaluates explicit audit decisions recorded against tools, prompts and
/// resources. Invoked only when the context carries audit rules.
pub struct AuditValidator;

impl AuditValidator {
    /// Returns `None` when no audit policy applied to this payload
    ///
    /// Server-level policies are matched by lowercased server name;
    /// resource-level policies by the raw resource name.
    pub fn validate(ctx: &ValidationContext, payload: &str) -> Option<ValidationResult> {
        let resource_name = extractor::extract_resource_name(payload)?;

        if let Some(server_name) = ctx.mcp_server_name.as_deref() {
            if let Some(policy) = ctx.audit_policies.get(&server_name.to_lowercase()) {
                let result = Self::evaluate_policy(policy, ctx);
                if !result.allowed {
                    return Some(result);
                }
            }
        }

        let policy = ctx.audit_policies.get(&resource_name)?;
        Some(Self::evaluate_policy(policy, ctx))
    }

    fn evaluate_policy(policy: &AuditPolicy, ctx: &ValidationContext) -> ValidationResult {
        match policy.remarks.trim().to_lowercase().as_str() {
            "approved" => ValidationResult::allow(),
            "rejected" => ValidationResult::blocked_with_policy(
                "Resource access has been rejected by Audit Policy",
                AUDIT_POLICY_ID,
            ),
            "conditionally approved" => Self::evaluate_conditions(policy, ctx),
            other => {
                warn!(
                    resource = %policy.resource_name,
                    remarks = %other,
                    "Unrecognized audit remarks, allowing"
                );
                ValidationResult::allow()
            }
        }
    }

    fn evaluate_conditions(policy: &AuditPolicy, ctx: &ValidationContext) -> ValidationResult {
        let conditions = match policy.approval_conditions.as_ref() {
            Some(c) => c,
            None => return ValidationResult::allow(),
        };

        if conditions.expires_at > 0 && unix_seconds() > conditions.expires_at {
            return ValidationResult::blocked_with_policy(
                "Conditional approval has expired",
                AUDIT_POLICY_ID,
            );
        }

        if let Some(client_ip) = ctx.client_ip.as_deref() {
            let has_ip_restrictions =
                !conditions.allowed_ips.is_empty() || !conditions.allowed_ip_ranges.is_empty();
            if has_ip_restrictions && !ip_allowed(client_ip, conditions) {
                return ValidationResult::blocked_with_policy(
                    format!(
                        "Client IP {} is not permitted by Audit Policy for '{}'",
                        client_ip, policy.resource_name
                    ),
                    AUDIT_POLICY_ID,
                );
            }
        }

        if !conditions.whitelisted_endpoints.is_empty() {
            warn!(
                resource = %policy.resource_name,
                "whitelistedEndpoints is recognized but not enforced"
            );
        }

        debug!(resource = %policy.resource_name, "Conditional approval satisfied");
        ValidationResult::allow()
    }
}

fn ip_allowed(client_ip: &str, conditions: &crate::core::models::ApprovalConditions) -> bool {
    if conditions.allowed_ips.iter().any(|ip| ip == client_ip) {
        return true;
    }
    conditions
        .allowed_ip_ranges
        .iter()
        .any(|cidr| is_ip_in_cidr(client_ip, cidr))
}

/// IPv4-only CIDR membership by bitmask equality
pub fn is_ip_in_cidr(ip: &str, cidr: &str) -> bool {
    let (network, bits) = match cidr.split_once('/') {
        Some((network, bits)) => (network, bits),
        None => return false,
    };

    let bits: u32 = match bits.parse() {
        Ok(b) if b <= 32 => b,
        _ => return false,
    };

    let (ip, network) = match (ip_to_u32(ip), ip_to_u32(network)) {
        (Some(ip), Some(network)) => (ip, network),
        _ => return false,
    };

    let mask: u32 = if bits == 0 {
        0
    } else {
        !(((1u64 << (32 - bits)) - 1) as u32)
    };

    ip & mask == network & mask
}

/// Fold four dotted octets into a u32
pub fn ip_to_u32(ip: &str) -> Option<u32> {
    let mut value: u32 = 0;
    let mut octets = 0;
    for part in ip.split('.') {
        let octet: u8 = part.parse().ok()?;
        value = (value << 8) | octet as u32;
        octets += 1;
    }
    if octets == 4 {
        Some(value)
    } else {
        None
    }
}

fn unix_seconds() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
