//! Graph data model: node and relation types, edges, triplets
//!
//! Relation types split into two families. Positive relations describe how
//! the scheduler estate actually hangs together (DEPENDS_ON, RUNS_ON,
//! USES_RESOURCE, MEMBER_OF). Error-knowledge relations record
//! associations an audit judged wrong; they carry `is_error_knowledge` and
//! coexist with positive edges rather than replacing them.

use sentra_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// Node type tags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    /// A scheduled job
    Job,
    /// A job stream (schedule)
    JobStream,
    /// A workstation / agent
    Workstation,
    /// A logical resource
    Resource,
    /// A product error code
    ErrorCode,
    /// A CLI command
    Command,
    /// A normalized query pattern
    QueryPattern,
    /// A summarized response pattern
    ResponsePattern,
    /// Anything else
    Concept,
}

impl NodeType {
    /// Stable snake_case name used in persistence
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Job => "job",
            NodeType::JobStream => "job_stream",
            NodeType::Workstation => "workstation",
            NodeType::Resource => "resource",
            NodeType::ErrorCode => "error_code",
            NodeType::Command => "command",
            NodeType::QueryPattern => "query_pattern",
            NodeType::ResponsePattern => "response_pattern",
            NodeType::Concept => "concept",
        }
    }

    /// Parse the stable name
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "job" => NodeType::Job,
            "job_stream" => NodeType::JobStream,
            "workstation" => NodeType::Workstation,
            "resource" => NodeType::Resource,
            "error_code" => NodeType::ErrorCode,
            "command" => NodeType::Command,
            "query_pattern" => NodeType::QueryPattern,
            "response_pattern" => NodeType::ResponsePattern,
            "concept" => NodeType::Concept,
            _ => return None,
        })
    }
}

/// Directed relation tags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationType {
    /// Job depends on another job
    DependsOn,
    /// Job runs on a workstation
    RunsOn,
    /// Job uses a resource
    UsesResource,
    /// Job belongs to a job stream
    MemberOf,
    /// Recorded-wrong association between two entities
    IncorrectAssociation,
    /// Recorded-wrong solution for an error code
    IncorrectSolutionFor,
    /// Tool or command that must not be used for a target
    ShouldNotUseFor,
    /// Two entities that have been confused with each other
    ConfusionWith,
    /// Association that relies on deprecated information
    DeprecatedInfo,
    /// Entity that is not relevant to a query pattern
    NotRelevantTo,
    /// Association produced by misleading context
    MisleadingContext,
    /// A frequently recurring mistake
    CommonError,
}

impl RelationType {
    /// Stable SCREAMING_SNAKE_CASE name used in persistence
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationType::DependsOn => "DEPENDS_ON",
            RelationType::RunsOn => "RUNS_ON",
            RelationType::UsesResource => "USES_RESOURCE",
            RelationType::MemberOf => "MEMBER_OF",
            RelationType::IncorrectAssociation => "INCORRECT_ASSOCIATION",
            RelationType::IncorrectSolutionFor => "INCORRECT_SOLUTION_FOR",
            RelationType::ShouldNotUseFor => "SHOULD_NOT_USE_FOR",
            RelationType::ConfusionWith => "CONFUSION_WITH",
            RelationType::DeprecatedInfo => "DEPRECATED_INFO",
            RelationType::NotRelevantTo => "NOT_RELEVANT_TO",
            RelationType::MisleadingContext => "MISLEADING_CONTEXT",
            RelationType::CommonError => "COMMON_ERROR",
        }
    }

    /// Parse the stable name; anything unknown is a rejected predicate
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "DEPENDS_ON" => RelationType::DependsOn,
            "RUNS_ON" => RelationType::RunsOn,
            "USES_RESOURCE" => RelationType::UsesResource,
            "MEMBER_OF" => RelationType::MemberOf,
            "INCORRECT_ASSOCIATION" => RelationType::IncorrectAssociation,
            "INCORRECT_SOLUTION_FOR" => RelationType::IncorrectSolutionFor,
            "SHOULD_NOT_USE_FOR" => RelationType::ShouldNotUseFor,
            "CONFUSION_WITH" => RelationType::ConfusionWith,
            "DEPRECATED_INFO" => RelationType::DeprecatedInfo,
            "NOT_RELEVANT_TO" => RelationType::NotRelevantTo,
            "MISLEADING_CONTEXT" => RelationType::MisleadingContext,
            "COMMON_ERROR" => RelationType::CommonError,
            _ => return None,
        })
    }

    /// Whether this relation records negative knowledge
    pub fn is_error_knowledge(&self) -> bool {
        !matches!(
            self,
            RelationType::DependsOn
                | RelationType::RunsOn
                | RelationType::UsesResource
                | RelationType::MemberOf
        )
    }
}

/// A graph node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    /// Node id (unique across types)
    pub id: String,
    /// Type tag
    pub node_type: NodeType,
    /// Opaque property map
    pub properties: serde_json::Map<String, serde_json::Value>,
}

/// A directed graph edge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
    /// Row id from persistence
    pub id: i64,
    /// Source node id
    pub source: String,
    /// Target node id
    pub target: String,
    /// Relation tag
    pub relation: RelationType,
    /// Opaque property map (confidence, source, created_at, ...)
    pub properties: serde_json::Map<String, serde_json::Value>,
    /// Whether this edge records negative knowledge
    pub is_error_knowledge: bool,
}

/// Input record for edge insertion
#[derive(Debug, Clone, PartialEq)]
pub struct Triplet {
    /// Subject node id
    pub subject_id: String,
    /// Subject node type
    pub subject_type: NodeType,
    /// Relation; must be a permitted predicate
    pub predicate: RelationType,
    /// Object node id
    pub object_id: String,
    /// Object node type
    pub object_type: NodeType,
    /// Confidence in [0, 1]
    pub confidence: f64,
    /// Memory/audit record this triplet came from
    pub source_memory_id: String,
}

impl Triplet {
    /// Validate ids and confidence
    pub fn validate(&self) -> Result<()> {
        if self.subject_id.is_empty() || self.object_id.is_empty() {
            return Err(Error::Validation(
                "triplet endpoints cannot be empty".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(Error::Validation(format!(
                "triplet confidence must be in [0, 1]: {}",
                self.confidence
            )));
        }
        Ok(())
    }

    /// Parse a predicate name, rejecting anything outside the permitted set
    pub fn parse_predicate(name: &str) -> Result<RelationType> {
        RelationType::from_name(name)
            .ok_or_else(|| Error::Validation(format!("unknown relation type: {name}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_type_round_trip() {
        for node_type in [
            NodeType::Job,
            NodeType::JobStream,
            NodeType::Workstation,
            NodeType::Resource,
            NodeType::ErrorCode,
            NodeType::Command,
            NodeType::QueryPattern,
            NodeType::ResponsePattern,
            NodeType::Concept,
        ] {
            assert_eq!(NodeType::from_name(node_type.as_str()), Some(node_type));
        }
    }

    #[test]
    fn test_relation_round_trip_and_error_split() {
        let positive = [
            RelationType::DependsOn,
            RelationType::RunsOn,
            RelationType::UsesResource,
            RelationType::MemberOf,
        ];
        let negative = [
            RelationType::IncorrectAssociation,
            RelationType::IncorrectSolutionFor,
            RelationType::ShouldNotUseFor,
            RelationType::ConfusionWith,
            RelationType::DeprecatedInfo,
            RelationType::NotRelevantTo,
            RelationType::MisleadingContext,
            RelationType::CommonError,
        ];
        for relation in positive {
            assert!(!relation.is_error_knowledge());
            assert_eq!(RelationType::from_name(relation.as_str()), Some(relation));
        }
        for relation in negative {
            assert!(relation.is_error_knowledge());
            assert_eq!(RelationType::from_name(relation.as_str()), Some(relation));
        }
    }

    #[test]
    fn test_unknown_predicate_rejected() {
        assert!(Triplet::parse_predicate("TOTALLY_MADE_UP").is_err());
        assert!(Triplet::parse_predicate("DEPENDS_ON").is_ok());
    }

    #[test]
    fn test_triplet_validation() {
        let mut triplet = Triplet {
            subject_id: "BATCH_A".to_string(),
            subject_type: NodeType::Job,
            predicate: RelationType::IncorrectSolutionFor,
            object_id: "AWSBIS529".to_string(),
            object_type: NodeType::ErrorCode,
            confidence: 0.9,
            source_memory_id: "m1".to_string(),
        };
        assert!(triplet.validate().is_ok());

        triplet.confidence = 1.5;
        assert!(triplet.validate().is_err());
        triplet.confidence = 0.9;
        triplet.object_id.clear();
        assert!(triplet.validate().is_err());
    }
}
