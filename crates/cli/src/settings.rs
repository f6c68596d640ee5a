//! File settings for the binary.

use anyhow::{Context, Result};
use dexbot_domain::{Address, Token, TradingPair};
use dexbot_execution::config::EngineConfig;
use dexbot_protocols::{LinearOracle, RpcConfig};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One traded token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenSettings {
    pub address: Address,
    pub symbol: String,
    pub decimals: u8,
}

impl From<&TokenSettings> for Token {
    fn from(t: &TokenSettings) -> Self {
        Token::new(t.address, t.symbol.clone(), t.decimals)
    }
}

/// Pair, paper pool seed and starting wallet balances.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketSettings {
    pub base: TokenSettings,
    pub quote: TokenSettings,
    pub router: Address,
    /// Paper pool reserves in human units.
    pub reserve_base: Decimal,
    pub reserve_quote: Decimal,
    pub fee_bps: u32,
    /// Paper wallet balances in human units.
    pub fund_base: Decimal,
    pub fund_quote: Decimal,
}

impl Default for MarketSettings {
    fn default() -> Self {
        Self {
            base: TokenSettings {
                address: Address::repeat_byte(0xee),
                symbol: "WETH".to_string(),
                decimals: 18,
            },
            quote: TokenSettings {
                address: Address::repeat_byte(0xcc),
                symbol: "USDC".to_string(),
                decimals: 6,
            },
            router: Address::repeat_byte(0xaa),
            reserve_base: Decimal::from(1_000),
            reserve_quote: Decimal::from(2_000_000),
            fee_bps: 30,
            fund_base: Decimal::from(5),
            fund_quote: Decimal::from(10_000),
        }
    }
}

impl MarketSettings {
    pub fn pair(&self) -> TradingPair {
        TradingPair::new((&self.base).into(), (&self.quote).into(), self.router)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/dexbot".to_string(),
            max_connections: 5,
        }
    }
}

/// Everything read from the settings file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub engine: EngineConfig,
    pub market: MarketSettings,
    /// Model behind `ml` strategies.
    pub oracle: Option<LinearOracle>,
    /// Read chain events from a node instead of the paper chain.
    pub rpc: Option<RpcConfig>,
    /// Persist state in Postgres instead of memory.
    pub database: Option<DatabaseSettings>,
}

impl Settings {
    /// Reads `path`, or returns defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading settings from {}", path.display()))?;
        let settings: Settings = serde_json::from_str(&raw)
            .with_context(|| format!("parsing settings in {}", path.display()))?;
        settings.engine.validate()?;
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_file() {
        let settings = Settings::load(None).unwrap();
        assert_eq!(settings.market.pair().symbol(), "WETH/USDC");
        assert!(settings.database.is_none());
        settings.engine.validate().unwrap();
    }

    #[test]
    fn test_nested_sections() {
        let settings: Settings = serde_json::from_str(
            r#"{
                "engine": { "strategies": [{ "kind": "ml" }] },
                "market": { "fee_bps": 5 },
                "oracle": { "weights": [0.4, -0.1], "bias": 0.0 },
                "database": { "url": "postgres://db/bot" }
            }"#,
        )
        .unwrap();
        assert_eq!(settings.market.fee_bps, 5);
        assert_eq!(settings.market.base.symbol, "WETH");
        assert_eq!(settings.oracle.map(|o| o.weights.len()), Some(2));
        assert_eq!(settings.database.map(|d| d.max_connections), Some(5));
    }
}
