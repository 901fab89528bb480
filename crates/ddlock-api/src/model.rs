//! Cluster member models
//!
//! Members are data-serving nodes addressed by a stable identifier, tracked
//! independently of which machine currently hosts them.

use std::{
    fmt::{Display, Formatter},
    str::FromStr,
};

use serde::{Deserialize, Serialize};

/// Stable cluster member identifier (a UUID assigned at first registration)
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemberId(String);

impl MemberId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random member identifier
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for MemberId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for MemberId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Node state enumeration for cluster members
#[derive(Clone, Copy, Debug, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum NodeState {
    Starting,
    #[default]
    Up,
    Suspicious,
    Down,
    Isolation,
    /// Permanently removed from service; never needs lock updates again
    Decommissioned,
}

impl NodeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeState::Starting => "STARTING",
            NodeState::Up => "UP",
            NodeState::Suspicious => "SUSPICIOUS",
            NodeState::Down => "DOWN",
            NodeState::Isolation => "ISOLATION",
            NodeState::Decommissioned => "DECOMMISSIONED",
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self, NodeState::Up)
    }

    /// Whether lock updates are pushed to a member in this state
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            NodeState::Starting | NodeState::Up | NodeState::Suspicious
        )
    }
}

impl Display for NodeState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for NodeState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "STARTING" => Ok(NodeState::Starting),
            "UP" => Ok(NodeState::Up),
            "SUSPICIOUS" => Ok(NodeState::Suspicious),
            "DOWN" => Ok(NodeState::Down),
            "ISOLATION" => Ok(NodeState::Isolation),
            "DECOMMISSIONED" => Ok(NodeState::Decommissioned),
            _ => Err(format!("Invalid node state: {}", s)),
        }
    }
}

/// Cluster member information structure
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    pub id: MemberId,
    pub address: String,
    pub state: NodeState,
    /// Registration timestamp (Unix millis)
    pub registered_at: i64,
}

impl Member {
    pub fn new(id: MemberId, address: impl Into<String>) -> Self {
        Self {
            id,
            address: address.into(),
            state: NodeState::Up,
            registered_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.state.is_healthy()
    }

    pub fn is_live(&self) -> bool {
        self.state.is_live()
    }
}

/// Builder pattern for creating Member instances
pub struct MemberBuilder {
    id: MemberId,
    address: String,
    node_state: NodeState,
}

impl MemberBuilder {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            id: MemberId::generate(),
            address: address.into(),
            node_state: NodeState::Up,
        }
    }

    pub fn id(mut self, id: impl Into<MemberId>) -> Self {
        self.id = id.into();
        self
    }

    pub fn node_state(mut self, state: NodeState) -> Self {
        self.node_state = state;
        self
    }

    pub fn build(self) -> Member {
        let mut member = Member::new(self.id, self.address);
        member.state = self.node_state;
        member
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_state_round_trip_names() {
        for state in [
            NodeState::Starting,
            NodeState::Up,
            NodeState::Suspicious,
            NodeState::Down,
            NodeState::Isolation,
            NodeState::Decommissioned,
        ] {
            assert_eq!(state.as_str().parse::<NodeState>(), Ok(state));
        }
        assert!("GONE".parse::<NodeState>().is_err());
    }

    #[test]
    fn test_node_state_liveness() {
        assert!(NodeState::Up.is_live());
        assert!(NodeState::Starting.is_live());
        assert!(NodeState::Suspicious.is_live());
        assert!(!NodeState::Down.is_live());
        assert!(!NodeState::Isolation.is_live());
        assert!(!NodeState::Decommissioned.is_live());
    }

    #[test]
    fn test_member_builder() {
        let member = MemberBuilder::new("10.0.0.1:9100")
            .id("ts-1")
            .node_state(NodeState::Starting)
            .build();
        assert_eq!(member.id, MemberId::new("ts-1"));
        assert_eq!(member.address, "10.0.0.1:9100");
        assert!(!member.is_healthy());
        assert!(member.is_live());
    }

    #[test]
    fn test_generated_member_ids_are_unique() {
        assert_ne!(MemberId::generate(), MemberId::generate());
    }
}
