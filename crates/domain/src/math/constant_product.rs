//! Constant product (x * y = k) swap math on raw amounts.

use crate::error::TradingError;
use crate::token::TokenAmount;
use primitive_types::U256;

const BPS: u32 = 10_000;

/// Reserves after an exact-input swap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapOutcome {
    pub amount_out: TokenAmount,
    pub reserve_in: U256,
    pub reserve_out: U256,
}

/// Output of an exact-input swap, rounded down.
///
/// `dy = y * dx * (1 - fee) / (x + dx * (1 - fee))`
pub fn calculate_out_amount(
    amount_in: TokenAmount,
    reserve_in: TokenAmount,
    reserve_out: TokenAmount,
    fee_bps: u32,
) -> Result<TokenAmount, TradingError> {
    let (dx, x, y) = (amount_in.0, reserve_in.0, reserve_out.0);
    if dx.is_zero() {
        return Ok(TokenAmount::zero());
    }
    if x.is_zero() || y.is_zero() {
        return Err(TradingError::Validation("reserves must be non-zero".into()));
    }
    if fee_bps >= BPS {
        return Err(TradingError::Validation(format!("fee out of range: {fee_bps} bps")));
    }

    let overflow = || TradingError::Validation("constant product overflow".into());
    let dx_after_fee = dx.checked_mul(U256::from(BPS - fee_bps)).ok_or_else(overflow)?;
    let numerator = dx_after_fee.checked_mul(y).ok_or_else(overflow)?;
    let denominator = x
        .checked_mul(U256::from(BPS))
        .and_then(|v| v.checked_add(dx_after_fee))
        .ok_or_else(overflow)?;
    Ok(TokenAmount(numerator / denominator))
}

/// Applies an exact-input swap to the reserves. The fee stays in the pool.
pub fn swap_exact_in(
    amount_in: TokenAmount,
    reserve_in: U256,
    reserve_out: U256,
    fee_bps: u32,
) -> Result<SwapOutcome, TradingError> {
    let amount_out = calculate_out_amount(
        amount_in,
        TokenAmount(reserve_in),
        TokenAmount(reserve_out),
        fee_bps,
    )?;
    let reserve_in = reserve_in
        .checked_add(amount_in.0)
        .ok_or_else(|| TradingError::Validation("reserve overflow".into()))?;
    // amount_out < reserve_out whenever reserve_in is non-zero
    let reserve_out = reserve_out - amount_out.0;
    Ok(SwapOutcome {
        amount_out,
        reserve_in,
        reserve_out,
    })
}
