// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Endpoint identifiers in the "ipn" scheme: `ipn:<node>.<service>`, both
// numbers written in base 10. This is the only scheme the agent speaks.

use crate::error::{BpError, Result};

/// Longest endpoint ID string accepted or produced.
pub const MAX_EID_STRING: usize = 128;

/// Shortest possible ipn EID: `ipn:N.S` with one digit each.
const MIN_EID_STRING: usize = 7;

/// Parse `ipn:N.S` into `(node, service)`.
///
/// Node and service must be strictly positive base-10 numbers below
/// `u64::MAX`; anything else is `InvalidEid`.
pub fn eid2ipn(eid: &str) -> Result<(u64, u64)> {
    if eid.len() < MIN_EID_STRING {
        return Err(BpError::InvalidEid("too short"));
    }
    if eid.len() > MAX_EID_STRING {
        return Err(BpError::InvalidEid("too long"));
    }
    let rest = eid
        .strip_prefix("ipn:")
        .ok_or(BpError::InvalidEid("scheme is not ipn"))?;
    let (node_str, service_str) = rest
        .split_once('.')
        .ok_or(BpError::InvalidEid("missing dotted notation"))?;
    let node = parse_component(node_str)?;
    let service = parse_component(service_str)?;
    Ok((node, service))
}

/// Format `(node, service)` as `ipn:N.S`.
pub fn ipn2eid(node: u64, service: u64) -> Result<String> {
    check_component(node)?;
    check_component(service)?;
    Ok(format!("ipn:{node}.{service}"))
}

fn parse_component(s: &str) -> Result<u64> {
    // Reject empty, signs, and leading '+': only ASCII digits are valid.
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return Err(BpError::InvalidEid("component is not a base-10 number"));
    }
    let value: u64 = s
        .parse()
        .map_err(|_| BpError::InvalidEid("component out of range"))?;
    check_component(value)?;
    Ok(value)
}

fn check_component(value: u64) -> Result<u64> {
    if value == 0 || value == u64::MAX {
        return Err(BpError::InvalidEid("component out of range"));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_basic() {
        assert_eq!(eid2ipn("ipn:42.7").unwrap(), (42, 7));
        assert_eq!(eid2ipn("ipn:1.1").unwrap(), (1, 1));
    }

    #[test]
    fn reject_missing_service() {
        assert!(matches!(eid2ipn("ipn:42"), Err(BpError::InvalidEid(_))));
    }

    #[test]
    fn reject_wrong_scheme() {
        assert!(matches!(eid2ipn("dtn:42.7"), Err(BpError::InvalidEid(_))));
    }

    #[test]
    fn reject_zero_and_junk() {
        assert!(eid2ipn("ipn:0.7").is_err());
        assert!(eid2ipn("ipn:42.0").is_err());
        assert!(eid2ipn("ipn:4a.7").is_err());
        assert!(eid2ipn("ipn:.7777").is_err());
    }

    #[test]
    fn format_roundtrip() {
        let eid = ipn2eid(42, 7).unwrap();
        assert_eq!(eid, "ipn:42.7");
        assert_eq!(eid2ipn(&eid).unwrap(), (42, 7));
    }

    #[test]
    fn format_rejects_zero() {
        assert!(ipn2eid(0, 7).is_err());
    }
}
