//! Protocol version negotiation
//!
//! The set of supported revisions is closed: two dated releases plus the
//! rolling `draft`. A client requesting `latest` is mapped to the newest
//! known release; anything else unrecognized fails initialization.

use serde::{Deserialize, Serialize};

use crate::core::error::{McpError, McpResult};

/// A supported MCP protocol revision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ProtocolVersion {
    /// The 2024-11-05 release
    #[serde(rename = "2024-11-05")]
    V2024_11_05,
    /// The 2025-03-26 release
    #[default]
    #[serde(rename = "2025-03-26")]
    V2025_03_26,
    /// The rolling draft revision
    #[serde(rename = "draft")]
    Draft,
}

/// All revisions the engine speaks, oldest first
pub const SUPPORTED_VERSIONS: &[ProtocolVersion] = &[
    ProtocolVersion::V2024_11_05,
    ProtocolVersion::V2025_03_26,
    ProtocolVersion::Draft,
];

impl ProtocolVersion {
    /// Wire representation of the version
    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolVersion::V2024_11_05 => "2024-11-05",
            ProtocolVersion::V2025_03_26 => "2025-03-26",
            ProtocolVersion::Draft => "draft",
        }
    }

    /// The newest known revision, which `latest` aliases to
    pub fn latest() -> Self {
        ProtocolVersion::Draft
    }

    /// Whether audio content items exist in this revision
    pub fn supports_audio(&self) -> bool {
        !matches!(self, ProtocolVersion::V2024_11_05)
    }

    /// Whether progress notifications may carry a `message` field
    pub fn supports_progress_message(&self) -> bool {
        !matches!(self, ProtocolVersion::V2024_11_05)
    }

    /// Whether the engine may emit outbound batches on this revision.
    ///
    /// Inbound batches are accepted on every revision for back-compat.
    pub fn allows_outbound_batch(&self) -> bool {
        !matches!(self, ProtocolVersion::Draft)
    }
}

impl std::fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProtocolVersion {
    type Err = McpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "2024-11-05" => Ok(ProtocolVersion::V2024_11_05),
            "2025-03-26" => Ok(ProtocolVersion::V2025_03_26),
            "draft" => Ok(ProtocolVersion::Draft),
            other => Err(McpError::InvalidParams(format!(
                "Unsupported protocol version: {other}"
            ))),
        }
    }
}

/// Validate a client-requested version string and select the effective
/// revision.
///
/// Recognized versions are used verbatim; `latest` maps to the newest
/// known release. Unknown versions produce an invalid-params error whose
/// message lists the supported set.
pub fn negotiate(requested: &str) -> McpResult<ProtocolVersion> {
    if requested == "latest" {
        return Ok(ProtocolVersion::latest());
    }

    requested.parse().map_err(|_: McpError| {
        let supported: Vec<&str> = SUPPORTED_VERSIONS.iter().map(|v| v.as_str()).collect();
        McpError::InvalidParams(format!(
            "Unsupported protocol version: {requested} (supported: {})",
            supported.join(", ")
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negotiate_known_versions() {
        assert_eq!(
            negotiate("2024-11-05").unwrap(),
            ProtocolVersion::V2024_11_05
        );
        assert_eq!(
            negotiate("2025-03-26").unwrap(),
            ProtocolVersion::V2025_03_26
        );
        assert_eq!(negotiate("draft").unwrap(), ProtocolVersion::Draft);
    }

    #[test]
    fn test_negotiate_latest_alias() {
        assert_eq!(negotiate("latest").unwrap(), ProtocolVersion::latest());
    }

    #[test]
    fn test_negotiate_unknown_lists_supported() {
        let err = negotiate("2023-01-01").unwrap_err();
        match err {
            McpError::InvalidParams(msg) => {
                assert!(msg.contains("2024-11-05"));
                assert!(msg.contains("2025-03-26"));
                assert!(msg.contains("draft"));
            }
            other => panic!("expected InvalidParams, got {other:?}"),
        }
    }

    #[test]
    fn test_version_feature_flags() {
        assert!(!ProtocolVersion::V2024_11_05.supports_audio());
        assert!(ProtocolVersion::V2025_03_26.supports_audio());
        assert!(ProtocolVersion::Draft.supports_audio());
        assert!(!ProtocolVersion::Draft.allows_outbound_batch());
        assert!(ProtocolVersion::V2025_03_26.allows_outbound_batch());
    }

    #[test]
    fn test_version_serde_round_trip() {
        let v: ProtocolVersion = serde_json::from_str("\"2025-03-26\"").unwrap();
        assert_eq!(v, ProtocolVersion::V2025_03_26);
        assert_eq!(serde_json::to_string(&v).unwrap(), "\"2025-03-26\"");
    }
}
