//! Deterministic identity for nodes and edges.
//!
//! A node id is `provider:account:region:resourceType:nativeId` and an edge
//! id is `source--relationship--target`. Both are pure functions of their
//! inputs, which is what turns repeated discovery passes into upserts.

use url::Url;

use crate::schema::{CloudProvider, NodeInput, NodeStatus, RelationshipType, ResourceType};

/// Region token used for resources that are not regional.
pub const GLOBAL_REGION: &str = "global";

/// Build the canonical node id from its identity tuple.
pub fn build_node_id(
    provider: CloudProvider,
    account: &str,
    region: &str,
    resource_type: ResourceType,
    native_id: &str,
) -> String {
    format!(
        "{}:{}:{}:{}:{}",
        provider.as_str(),
        account,
        region,
        resource_type.as_str(),
        native_id
    )
}

/// Build the canonical edge id.
pub fn build_edge_id(source_id: &str, relationship: RelationshipType, target_id: &str) -> String {
    format!("{}--{}--{}", source_id, relationship.as_str(), target_id)
}

/// The identity tuple recovered from a node id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeIdParts {
    pub provider: CloudProvider,
    pub account: String,
    pub region: String,
    pub resource_type: ResourceType,
    pub native_id: String,
}

/// Split a node id back into its parts.
///
/// The native id is everything after the fourth separator, so ARNs and other
/// ids containing `:` survive the round trip.
pub fn parse_node_id(id: &str) -> Option<NodeIdParts> {
    let mut parts = id.splitn(5, ':');
    let provider = CloudProvider::parse(parts.next()?)?;
    let account = parts.next()?.to_string();
    let region = parts.next()?.to_string();
    let resource_type = ResourceType::parse(parts.next()?)?;
    let native_id = parts.next()?.to_string();
    if native_id.is_empty() {
        return None;
    }
    Some(NodeIdParts {
        provider,
        account,
        region,
        resource_type,
        native_id,
    })
}

/// Derive a native id from a value that references another resource.
///
/// ARNs yield the segment after the last resource-type/id separator (`/` or
/// `:`), URLs their last non-empty path segment, anything else is returned
/// unchanged.
pub fn native_id_from_reference(value: &str) -> String {
    if value.starts_with("arn:") {
        if let Some(last) = value
            .rsplit(|c: char| c == '/' || c == ':')
            .find(|segment| !segment.is_empty())
        {
            return last.to_string();
        }
        return value.to_string();
    }

    if value.starts_with("http://") || value.starts_with("https://") {
        if let Ok(url) = Url::parse(value) {
            if let Some(last) = url
                .path_segments()
                .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
            {
                return last.to_string();
            }
        }
    }

    value.to_string()
}

/// Build a placeholder for a referenced node that could not be resolved.
///
/// The placeholder carries `placeholder: true` and `isRemoteReference: true`
/// in its metadata so it never passes for a discovered resource.
pub fn placeholder_node(target_id: &str) -> Option<NodeInput> {
    let parts = parse_node_id(target_id)?;
    let node = NodeInput::new(
        parts.provider,
        parts.account,
        parts.region,
        parts.resource_type,
        parts.native_id,
    )
    .with_status(NodeStatus::Unknown)
    .with_metadata("placeholder", serde_json::Value::Bool(true))
    .with_metadata("isRemoteReference", serde_json::Value::Bool(true));
    Some(node)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_node_id_is_deterministic() {
        let a = build_node_id(CloudProvider::Aws, "123", "us-east-1", ResourceType::Vpc, "vpc-1");
        let b = build_node_id(CloudProvider::Aws, "123", "us-east-1", ResourceType::Vpc, "vpc-1");
        assert_eq!(a, b);
        assert_eq!(a, "aws:123:us-east-1:vpc:vpc-1");

        let global = build_node_id(CloudProvider::Aws, "123", GLOBAL_REGION, ResourceType::IamRole, "admin");
        assert_eq!(global, "aws:123:global:iam-role:admin");
    }

    #[test]
    fn test_parse_node_id_keeps_colons_in_native_id() {
        let id = build_node_id(
            CloudProvider::Aws,
            "123",
            "us-east-1",
            ResourceType::Topic,
            "arn:aws:sns:us-east-1:123:alerts",
        );
        let parts = parse_node_id(&id).unwrap();
        assert_eq!(parts.provider, CloudProvider::Aws);
        assert_eq!(parts.resource_type, ResourceType::Topic);
        assert_eq!(parts.native_id, "arn:aws:sns:us-east-1:123:alerts");

        assert!(parse_node_id("aws:123:us-east-1:compute").is_none());
        assert!(parse_node_id("nimbus:1:r:compute:x").is_none());
    }

    #[test]
    fn test_native_id_from_reference() {
        assert_eq!(
            native_id_from_reference("arn:aws:iam::123:instance-profile/web-profile"),
            "web-profile"
        );
        assert_eq!(
            native_id_from_reference("arn:aws:lambda:us-east-1:123:function:ingest"),
            "ingest"
        );
        assert_eq!(
            native_id_from_reference("https://sqs.us-east-1.amazonaws.com/123/jobs"),
            "jobs"
        );
        assert_eq!(native_id_from_reference("vpc-1"), "vpc-1");
    }

    #[test]
    fn test_placeholder_node_is_flagged() {
        let node = placeholder_node("aws:123:us-east-1:vpc:vpc-9").unwrap();
        assert_eq!(node.id, "aws:123:us-east-1:vpc:vpc-9");
        assert_eq!(node.metadata.get("placeholder"), Some(&serde_json::Value::Bool(true)));
        assert_eq!(
            node.metadata.get("isRemoteReference"),
            Some(&serde_json::Value::Bool(true))
        );
        assert!(placeholder_node("not-an-id").is_none());
    }
}
