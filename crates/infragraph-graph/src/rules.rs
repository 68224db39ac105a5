//! Table-driven relationship extraction.
//!
//! Each [`RelationshipRule`] maps a field path of a raw provider record to a
//! target resource type and relationship. Adding a relationship means adding
//! a row to a table; the engine itself never changes per resource type.

use std::collections::HashSet;

use serde_json::Value;
use tracing::debug;

use crate::identity::{build_node_id, native_id_from_reference};
use crate::path;
use crate::schema::RelationshipType as R;
use crate::schema::ResourceType as T;
use crate::schema::{CloudProvider, DiscoveryMethod, EdgeInput, RelationshipType, ResourceType};

/// A declarative mapping from a raw field to an edge.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationshipRule {
    pub source_type: ResourceType,
    pub field: &'static str,
    pub target_type: ResourceType,
    pub relationship: RelationshipType,
    /// Emit one edge per resolved value instead of only the first
    pub is_array: bool,
    /// Also emit the inverse edge from target back to source
    pub bidirectional: bool,
}

const fn rule(
    source_type: ResourceType,
    field: &'static str,
    target_type: ResourceType,
    relationship: RelationshipType,
    is_array: bool,
    bidirectional: bool,
) -> RelationshipRule {
    RelationshipRule {
        source_type,
        field,
        target_type,
        relationship,
        is_array,
        bidirectional,
    }
}

/// Built-in rules for the common cloud API field names.
pub static STANDARD_RULES: &[RelationshipRule] = &[
    // Compute
    rule(T::Compute, "VpcId", T::Vpc, R::RunsIn, false, false),
    rule(T::Compute, "SubnetId", T::Subnet, R::RunsIn, false, false),
    rule(T::Compute, "SecurityGroups[].GroupId", T::SecurityGroup, R::SecuredBy, true, false),
    rule(T::Compute, "BlockDeviceMappings[].Ebs.VolumeId", T::Storage, R::AttachedTo, true, true),
    rule(T::Compute, "NetworkInterfaces[].NetworkInterfaceId", T::NetworkInterface, R::AttachedTo, true, false),
    rule(T::Compute, "IamInstanceProfile.Arn", T::IamRole, R::Uses, false, false),
    // Storage
    rule(T::Storage, "KmsKeyId", T::EncryptionKey, R::EncryptsWith, false, false),
    rule(T::ObjectStorage, "ServerSideEncryption.KmsKeyId", T::EncryptionKey, R::EncryptsWith, false, false),
    // Network
    rule(T::Subnet, "VpcId", T::Vpc, R::RunsIn, false, false),
    rule(T::SecurityGroup, "VpcId", T::Vpc, R::RunsIn, false, false),
    rule(T::RouteTable, "VpcId", T::Vpc, R::RunsIn, false, false),
    rule(T::RouteTable, "Associations[].SubnetId", T::Subnet, R::RoutesTo, true, false),
    rule(T::NatGateway, "SubnetId", T::Subnet, R::RunsIn, false, false),
    rule(T::InternetGateway, "Attachments[].VpcId", T::Vpc, R::AttachedTo, true, false),
    rule(T::NetworkInterface, "SubnetId", T::Subnet, R::RunsIn, false, false),
    rule(T::NetworkInterface, "Groups[].GroupId", T::SecurityGroup, R::SecuredBy, true, false),
    rule(T::Vpc, "PeeringConnections[].AccepterVpcInfo.VpcId", T::Vpc, R::PeersWith, true, true),
    // Load balancing and edge
    rule(T::LoadBalancer, "VpcId", T::Vpc, R::RunsIn, false, false),
    rule(T::LoadBalancer, "SecurityGroups[]", T::SecurityGroup, R::SecuredBy, true, false),
    rule(T::LoadBalancer, "AvailabilityZones[].SubnetId", T::Subnet, R::RunsIn, true, false),
    rule(T::LoadBalancer, "Targets[].Id", T::Compute, R::RoutesTo, true, true),
    rule(T::Cdn, "Origins[].DomainName", T::ObjectStorage, R::RoutesTo, true, false),
    rule(T::ApiGateway, "Integrations[].FunctionArn", T::ServerlessFunction, R::Triggers, true, true),
    rule(T::DnsZone, "RecordSets[].AliasTarget.DNSName", T::LoadBalancer, R::RoutesTo, true, false),
    // Data
    rule(T::Database, "DBSubnetGroup.VpcId", T::Vpc, R::RunsIn, false, false),
    rule(T::Database, "VpcSecurityGroups[].VpcSecurityGroupId", T::SecurityGroup, R::SecuredBy, true, false),
    rule(T::Database, "KmsKeyId", T::EncryptionKey, R::EncryptsWith, false, false),
    rule(T::Database, "ReadReplicaDBInstanceIdentifiers[]", T::Database, R::Replicates, true, true),
    rule(T::Cache, "SecurityGroups[].SecurityGroupId", T::SecurityGroup, R::SecuredBy, true, false),
    rule(T::Cache, "CacheSubnetGroup.VpcId", T::Vpc, R::RunsIn, false, false),
    // Serverless and messaging
    rule(T::ServerlessFunction, "VpcConfig.VpcId", T::Vpc, R::RunsIn, false, false),
    rule(T::ServerlessFunction, "VpcConfig.SubnetIds[]", T::Subnet, R::RunsIn, true, false),
    rule(T::ServerlessFunction, "VpcConfig.SecurityGroupIds[]", T::SecurityGroup, R::SecuredBy, true, false),
    rule(T::ServerlessFunction, "Role", T::IamRole, R::Uses, false, false),
    rule(T::ServerlessFunction, "EventSourceMappings[].EventSourceArn", T::Queue, R::SubscribesTo, true, true),
    rule(T::ServerlessFunction, "DeadLetterConfig.TargetArn", T::Queue, R::PublishesTo, false, false),
    rule(T::Topic, "Subscriptions[].Endpoint", T::Queue, R::PublishesTo, true, true),
    rule(T::Queue, "RedrivePolicy.deadLetterTargetArn", T::Queue, R::DependsOn, false, false),
    rule(T::Queue, "KmsMasterKeyId", T::EncryptionKey, R::EncryptsWith, false, false),
    rule(T::Stream, "KeyId", T::EncryptionKey, R::EncryptsWith, false, false),
    // Containers
    rule(T::Cluster, "ResourcesVpcConfig.VpcId", T::Vpc, R::RunsIn, false, false),
    rule(T::Cluster, "ResourcesVpcConfig.SubnetIds[]", T::Subnet, R::RunsIn, true, false),
    rule(T::Cluster, "RoleArn", T::IamRole, R::Uses, false, false),
    rule(T::Container, "ClusterArn", T::Cluster, R::RunsIn, false, false),
    rule(T::Container, "TaskRoleArn", T::IamRole, R::Uses, false, false),
    // Identity and secrets
    rule(T::IamRole, "AttachedPolicies[].PolicyArn", T::IamPolicy, R::Uses, true, true),
    rule(T::IamUser, "Groups[].GroupName", T::IamRole, R::MemberOf, true, false),
    rule(T::Secret, "KmsKeyId", T::EncryptionKey, R::EncryptsWith, false, false),
    rule(T::Certificate, "InUseBy[]", T::LoadBalancer, R::Secures, true, true),
];

/// The resource a set of rules is applied to.
#[derive(Debug, Clone, Copy)]
pub struct RuleSource<'a> {
    pub node_id: &'a str,
    pub provider: CloudProvider,
    pub resource_type: ResourceType,
    pub account: &'a str,
    pub region: &'a str,
}

/// Applies a rule table to raw records.
///
/// The table is shared, read-only configuration; the engine holds no
/// mutable state and is safe to share across tasks.
#[derive(Debug, Clone)]
pub struct RuleEngine {
    rules: Vec<RelationshipRule>,
}

impl RuleEngine {
    /// Engine over the built-in rule table.
    pub fn standard() -> Self {
        Self::with_rules(STANDARD_RULES.to_vec())
    }

    /// Engine over a custom rule table.
    pub fn with_rules(rules: Vec<RelationshipRule>) -> Self {
        Self { rules }
    }

    /// Add rules on top of the current table.
    pub fn extend(mut self, rules: impl IntoIterator<Item = RelationshipRule>) -> Self {
        self.rules.extend(rules);
        self
    }

    pub fn rules(&self) -> &[RelationshipRule] {
        &self.rules
    }

    /// Rules that apply to a given source type.
    pub fn rules_for(&self, source_type: ResourceType) -> impl Iterator<Item = &RelationshipRule> {
        self.rules.iter().filter(move |r| r.source_type == source_type)
    }

    /// Extract edges from `raw` for `source`.
    ///
    /// Targets are assumed to live in the same account and region as the
    /// source. Duplicate edge ids are dropped, keeping the first.
    pub fn extract(
        &self,
        source: &RuleSource<'_>,
        raw: &Value,
        discovered_via: DiscoveryMethod,
    ) -> Vec<EdgeInput> {
        let mut seen = HashSet::new();
        let mut edges = Vec::new();

        for rule in self.rules_for(source.resource_type) {
            let mut values = path::resolve(raw, rule.field);
            if !rule.is_array {
                values.truncate(1);
            }

            for value in values {
                let native_id = native_id_from_reference(&value);
                if native_id.is_empty() {
                    continue;
                }
                let target_id = build_node_id(
                    source.provider,
                    source.account,
                    source.region,
                    rule.target_type,
                    &native_id,
                );

                let forward = EdgeInput::new(source.node_id, &target_id, rule.relationship, discovered_via)
                    .with_metadata("field", Value::String(rule.field.to_string()));
                if seen.insert(forward.id.clone()) {
                    edges.push(forward);
                }

                if rule.bidirectional {
                    let reverse = EdgeInput::new(
                        &target_id,
                        source.node_id,
                        rule.relationship.inverse(),
                        discovered_via,
                    )
                    .with_metadata("field", Value::String(rule.field.to_string()))
                    .with_metadata("synthesized", Value::Bool(true));
                    if seen.insert(reverse.id.clone()) {
                        edges.push(reverse);
                    }
                }
            }
        }

        debug!(
            source = source.node_id,
            resource_type = source.resource_type.as_str(),
            edges = edges.len(),
            "extracted relationships"
        );
        edges
    }
}

impl Default for RuleEngine {
    fn default() -> Self {
        Self::standard()
    }
}

/// Collects edges for a whole discovery run, keeping the first write per id.
#[derive(Debug, Default)]
pub struct EdgeCollector {
    seen: HashSet<String>,
    edges: Vec<EdgeInput>,
}

impl EdgeCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an edge; returns false if its id was already collected.
    pub fn push(&mut self, edge: EdgeInput) -> bool {
        if self.seen.insert(edge.id.clone()) {
            self.edges.push(edge);
            true
        } else {
            false
        }
    }

    pub fn extend(&mut self, edges: impl IntoIterator<Item = EdgeInput>) {
        for edge in edges {
            self.push(edge);
        }
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    pub fn into_edges(self) -> Vec<EdgeInput> {
        self.edges
    }
}
