// Member change event handling
// Provides event-driven notifications for cluster membership changes

use ddlock_api::{Member, NodeState};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

/// Type of member change event
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum MemberChangeType {
    /// A new member joined the cluster
    MemberJoin,
    /// A member left the cluster
    MemberLeave,
    /// A member's state changed (e.g., UP -> DOWN)
    MemberStateChange,
}

impl std::fmt::Display for MemberChangeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MemberChangeType::MemberJoin => write!(f, "MEMBER_JOIN"),
            MemberChangeType::MemberLeave => write!(f, "MEMBER_LEAVE"),
            MemberChangeType::MemberStateChange => write!(f, "MEMBER_STATE_CHANGE"),
        }
    }
}

/// Member change event
#[derive(Clone, Debug)]
pub struct MemberChangeEvent {
    /// Type of change
    pub change_type: MemberChangeType,
    /// The affected member, as of the change
    pub member: Member,
    /// Previous state (for state changes)
    pub previous_state: Option<NodeState>,
    /// Timestamp of the event
    pub timestamp: i64,
}

impl MemberChangeEvent {
    pub fn member_join(member: Member) -> Self {
        Self {
            change_type: MemberChangeType::MemberJoin,
            member,
            previous_state: None,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn member_leave(member: Member) -> Self {
        Self {
            change_type: MemberChangeType::MemberLeave,
            member,
            previous_state: None,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn member_state_change(member: Member, previous_state: NodeState) -> Self {
        Self {
            change_type: MemberChangeType::MemberStateChange,
            member,
            previous_state: Some(previous_state),
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Whether the member just became reachable for lock updates and may hold a stale view
    pub fn needs_resync(&self) -> bool {
        match self.change_type {
            MemberChangeType::MemberJoin => self.member.is_live(),
            MemberChangeType::MemberStateChange => {
                self.member.is_healthy()
                    && self
                        .previous_state
                        .is_some_and(|previous| !previous.is_healthy())
            }
            MemberChangeType::MemberLeave => false,
        }
    }

    /// Whether the member will never need lock updates again
    pub fn is_departure(&self) -> bool {
        match self.change_type {
            MemberChangeType::MemberLeave => true,
            MemberChangeType::MemberStateChange => self.member.state == NodeState::Decommissioned,
            MemberChangeType::MemberJoin => false,
        }
    }
}

/// Fans member change events out to subscribers.
///
/// Live from construction: every event reaches the receivers subscribed at
/// the time it is published.
#[derive(Debug)]
pub struct MemberChangeEventPublisher {
    tx: broadcast::Sender<MemberChangeEvent>,
}

impl MemberChangeEventPublisher {
    pub fn new(queue_size: usize) -> Self {
        let (tx, _) = broadcast::channel(queue_size.max(1));
        Self { tx }
    }

    /// Publish an event; returns the number of subscribers it reached
    pub fn publish(&self, event: MemberChangeEvent) -> usize {
        debug!(
            change = %event.change_type,
            member = %event.member.id,
            state = %event.member.state,
            "Publishing member change event"
        );
        // No subscribers is fine
        self.tx.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MemberChangeEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ddlock_api::MemberBuilder;

    #[test]
    fn test_publisher_delivers_from_construction() {
        let publisher = MemberChangeEventPublisher::new(100);
        let mut receiver = publisher.subscribe();
        assert_eq!(publisher.subscriber_count(), 1);

        let member = MemberBuilder::new("127.0.0.1:9100").build();
        assert_eq!(publisher.publish(MemberChangeEvent::member_join(member)), 1);

        let received = receiver.try_recv().unwrap();
        assert_eq!(received.change_type, MemberChangeType::MemberJoin);
    }

    #[test]
    fn test_publish_without_subscribers_is_dropped() {
        let publisher = MemberChangeEventPublisher::new(0);
        let member = MemberBuilder::new("127.0.0.1:9100").build();
        assert_eq!(publisher.publish(MemberChangeEvent::member_leave(member)), 0);

        // Late subscribers only see later events
        let mut receiver = publisher.subscribe();
        assert!(receiver.try_recv().is_err());
    }

    #[test]
    fn test_resync_and_departure_classification() {
        let up = MemberBuilder::new("127.0.0.1:9100").build();
        let down = MemberBuilder::new("127.0.0.1:9100")
            .node_state(NodeState::Down)
            .build();
        let gone = MemberBuilder::new("127.0.0.1:9100")
            .node_state(NodeState::Decommissioned)
            .build();

        assert!(MemberChangeEvent::member_join(up.clone()).needs_resync());
        assert!(!MemberChangeEvent::member_join(down.clone()).needs_resync());
        assert!(MemberChangeEvent::member_state_change(up.clone(), NodeState::Down).needs_resync());
        assert!(!MemberChangeEvent::member_state_change(up.clone(), NodeState::Up).needs_resync());
        assert!(!MemberChangeEvent::member_state_change(down, NodeState::Up).needs_resync());

        assert!(MemberChangeEvent::member_leave(up.clone()).is_departure());
        assert!(MemberChangeEvent::member_state_change(gone, NodeState::Down).is_departure());
        assert!(!MemberChangeEvent::member_join(up).is_departure());
    }
}
