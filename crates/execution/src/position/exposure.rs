//! Position count and exposure checks.
//!
//! Used both by the risk engine's built-in rules and by
//! [`super::PositionManager::validate_trade`].

use dexbot_domain::{Rejection, RejectionCode};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Open-set totals at one instant, entries still in flight included.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExposureSnapshot {
    /// Open positions plus unsettled entries.
    pub open_count: usize,
    /// Sum of entry notionals in quote units.
    pub open_notional: Decimal,
}

/// Limits on the open set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExposureLimits {
    pub max_open_positions: usize,
    /// Maximum open notional as a fraction of portfolio value.
    pub max_exposure: Decimal,
}

/// Rejects with `MAX_POSITIONS` when the open set is full.
pub fn check_position_count(
    snapshot: &ExposureSnapshot,
    max_open_positions: usize,
) -> Result<(), Rejection> {
    if snapshot.open_count >= max_open_positions {
        return Err(Rejection::new(
            RejectionCode::MaxPositions,
            format!(
                "{} open positions, maximum is {max_open_positions}",
                snapshot.open_count
            ),
        ));
    }
    Ok(())
}

/// Rejects with `MAX_EXPOSURE` when the new notional would push open
/// exposure past `max_exposure` of portfolio value.
pub fn check_exposure(
    snapshot: &ExposureSnapshot,
    new_notional: Decimal,
    portfolio_value: Decimal,
    max_exposure: Decimal,
) -> Result<(), Rejection> {
    if portfolio_value <= Decimal::ZERO {
        return Err(Rejection::new(
            RejectionCode::MaxExposure,
            format!("portfolio value must be positive, got {portfolio_value}"),
        ));
    }
    let exposure = (snapshot.open_notional + new_notional) / portfolio_value;
    if exposure > max_exposure {
        return Err(Rejection::new(
            RejectionCode::MaxExposure,
            format!("exposure {exposure} would exceed maximum {max_exposure}"),
        ));
    }
    Ok(())
}
