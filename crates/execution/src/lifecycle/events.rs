//! Lifecycle events for position tracking.

use dexbot_domain::entities::{ClosedPosition, Position, PositionId};
use serde::{Deserialize, Serialize};

/// Type of lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecycleEventType {
    /// Entry trade confirmed.
    PositionOpened,
    /// Stop, target or manual close.
    PositionClosed,
}

/// Event broadcast by the position manager on every transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LifecycleEvent {
    Opened(Position),
    Closed(ClosedPosition),
}

impl LifecycleEvent {
    pub fn event_type(&self) -> LifecycleEventType {
        match self {
            Self::Opened(_) => LifecycleEventType::PositionOpened,
            Self::Closed(_) => LifecycleEventType::PositionClosed,
        }
    }

    pub fn position_id(&self) -> PositionId {
        match self {
            Self::Opened(p) => p.id,
            Self::Closed(c) => c.position.id,
        }
    }

    /// The closed record, for close events.
    pub fn closed(&self) -> Option<&ClosedPosition> {
        match self {
            Self::Closed(c) => Some(c),
            Self::Opened(_) => None,
        }
    }
}
