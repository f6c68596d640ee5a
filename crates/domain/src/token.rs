use crate::enums::Action;
use crate::error::TradingError;
use primitive_types::{H160, H256, U256};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, MathematicalOps};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Account or contract address.
pub type Address = H160;

/// Transaction hash, used as the transaction id.
pub type TxHash = H256;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Token {
    pub address: Address,
    pub symbol: String,
    pub decimals: u8,
}

impl Token {
    pub fn new(address: Address, symbol: impl Into<String>, decimals: u8) -> Self {
        Self {
            address,
            symbol: symbol.into(),
            decimals,
        }
    }

    /// Converts a human amount into raw token units, truncating dust.
    pub fn to_raw(&self, amount: Decimal) -> Result<TokenAmount, TradingError> {
        if amount.is_sign_negative() {
            return Err(TradingError::Validation(format!(
                "negative {} amount: {}",
                self.symbol, amount
            )));
        }
        let scaled = Decimal::TEN
            .checked_powu(u64::from(self.decimals))
            .and_then(|m| amount.checked_mul(m))
            .ok_or_else(|| {
                TradingError::Validation(format!("{} amount overflows: {}", self.symbol, amount))
            })?;
        let raw = scaled.trunc().to_u128().ok_or_else(|| {
            TradingError::Validation(format!("{} amount out of range: {}", self.symbol, amount))
        })?;
        Ok(TokenAmount::from(raw))
    }

    /// Converts raw token units into a human amount.
    pub fn from_raw(&self, amount: TokenAmount) -> Result<Decimal, TradingError> {
        if amount.0.bits() > 96 {
            return Err(TradingError::Validation(format!(
                "{} raw amount too large: {}",
                self.symbol, amount
            )));
        }
        let raw = amount.0.low_u128() as i128;
        Decimal::try_from_i128_with_scale(raw, u32::from(self.decimals)).map_err(|e| {
            TradingError::Validation(format!("{} raw amount {}: {}", self.symbol, amount, e))
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TokenAmount(pub U256);

impl TokenAmount {
    pub fn new(amount: impl Into<U256>) -> Self {
        Self(amount.into())
    }

    pub fn zero() -> Self {
        Self(U256::zero())
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn as_u256(&self) -> U256 {
        self.0
    }

    /// Smallest amount that still respects `slippage_bps`, rounded up so the
    /// bound is never looser than requested.
    pub fn min_after_slippage(&self, slippage_bps: u16) -> TokenAmount {
        let keep = U256::from(10_000u32.saturating_sub(u32::from(slippage_bps)));
        let scaled = self.0.saturating_mul(keep);
        let denom = U256::from(10_000u32);
        let mut min = scaled / denom;
        if !(scaled % denom).is_zero() {
            min += U256::one();
        }
        TokenAmount(min)
    }
}

impl From<u64> for TokenAmount {
    fn from(v: u64) -> Self {
        Self(U256::from(v))
    }
}

impl From<u128> for TokenAmount {
    fn from(v: u128) -> Self {
        Self(U256::from(v))
    }
}

impl fmt::Display for TokenAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A base/quote pair traded through one router contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradingPair {
    /// Asset being bought or sold.
    pub base: Token,
    /// Asset prices are quoted in.
    pub quote: Token,
    /// Router that executes swaps and needs the allowance.
    pub router: Address,
}

impl TradingPair {
    pub fn new(base: Token, quote: Token, router: Address) -> Self {
        Self {
            base,
            quote,
            router,
        }
    }

    /// Input and output tokens for an action. Buys spend quote, sells spend base.
    pub fn route(&self, action: Action) -> Option<(&Token, &Token)> {
        match action {
            Action::Buy => Some((&self.quote, &self.base)),
            Action::Sell => Some((&self.base, &self.quote)),
            Action::None => None,
        }
    }

    pub fn symbol(&self) -> String {
        format!("{}/{}", self.base.symbol, self.quote.symbol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn usdc() -> Token {
        Token::new(Address::repeat_byte(1), "USDC", 6)
    }

    #[test]
    fn test_raw_conversion() {
        let token = usdc();
        let raw = token.to_raw(dec!(12.3456789)).unwrap();
        assert_eq!(raw, TokenAmount::from(12_345_678u64));
        assert_eq!(token.from_raw(raw).unwrap(), dec!(12.345678));
    }

    #[test]
    fn test_negative_amount_rejected() {
        assert!(usdc().to_raw(dec!(-1)).is_err());
    }

    #[test]
    fn test_min_after_slippage_rounds_up() {
        // 999 * 9950 / 10000 = 994.005 -> 995
        let min = TokenAmount::from(999u64).min_after_slippage(50);
        assert_eq!(min, TokenAmount::from(995u64));

        let exact = TokenAmount::from(10_000u64).min_after_slippage(50);
        assert_eq!(exact, TokenAmount::from(9_950u64));
    }

    #[test]
    fn test_pair_route() {
        let weth = Token::new(Address::repeat_byte(2), "WETH", 18);
        let pair = TradingPair::new(weth.clone(), usdc(), Address::repeat_byte(9));

        let (input, output) = pair.route(Action::Buy).unwrap();
        assert_eq!(input.symbol, "USDC");
        assert_eq!(output.symbol, "WETH");
        assert!(pair.route(Action::None).is_none());
        assert_eq!(pair.symbol(), "WETH/USDC");
    }
}
