use serde::{Deserialize, Serialize};
use std::fmt;

/// Direction a strategy leans in a single signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Buy,
    Sell,
}

/// Action carried by a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Buy,
    Sell,
    None,
}

impl From<Direction> for Action {
    fn from(direction: Direction) -> Self {
        match direction {
            Direction::Buy => Action::Buy,
            Direction::Sell => Action::Sell,
        }
    }
}

impl Action {
    /// Position side opened by this action.
    pub fn side(&self) -> Option<Side> {
        match self {
            Action::Buy => Some(Side::Long),
            Action::Sell => Some(Side::Short),
            Action::None => None,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Buy => write!(f, "buy"),
            Action::Sell => write!(f, "sell"),
            Action::None => write!(f, "none"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    /// +1 for long, -1 for short.
    pub fn sign(&self) -> rust_decimal::Decimal {
        match self {
            Side::Long => rust_decimal::Decimal::ONE,
            Side::Short => rust_decimal::Decimal::NEGATIVE_ONE,
        }
    }

    /// Action that unwinds a position on this side.
    pub fn exit_action(&self) -> Action {
        match self {
            Side::Long => Action::Sell,
            Side::Short => Action::Buy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionStatus {
    Open,
    StoppedOut,
    TookProfit,
    ManuallyClosed,
}

impl PositionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PositionStatus::Open)
    }
}

/// Why a position left the open set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    StopLoss,
    TakeProfit,
    Manual,
}

impl CloseReason {
    /// Terminal state reached through this reason.
    pub fn status(&self) -> PositionStatus {
        match self {
            CloseReason::StopLoss => PositionStatus::StoppedOut,
            CloseReason::TakeProfit => PositionStatus::TookProfit,
            CloseReason::Manual => PositionStatus::ManuallyClosed,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::StopLoss => "stop_loss",
            CloseReason::TakeProfit => "take_profit",
            CloseReason::Manual => "manual",
        }
    }
}
