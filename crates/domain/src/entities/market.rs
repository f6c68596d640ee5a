use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Precomputed indicator values. Indicator math lives upstream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    pub sma_fast: Option<Decimal>,
    pub sma_slow: Option<Decimal>,
    pub macd: Option<Decimal>,
    pub macd_signal: Option<Decimal>,
    pub rsi: Option<Decimal>,
}

/// Market state handed to every strategy in one evaluation cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketData {
    pub symbol: String,
    pub price: Decimal,
    /// Realized volatility as a fraction (0.05 = 5%).
    pub volatility: Decimal,
    pub indicators: IndicatorSnapshot,
    /// Feature vector scored by the prediction oracle.
    #[serde(default)]
    pub features: Vec<f64>,
    pub timestamp: DateTime<Utc>,
}

impl MarketData {
    pub fn new(symbol: impl Into<String>, price: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            price,
            volatility: Decimal::ZERO,
            indicators: IndicatorSnapshot::default(),
            features: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_volatility(mut self, volatility: Decimal) -> Self {
        self.volatility = volatility;
        self
    }

    #[must_use]
    pub fn with_indicators(mut self, indicators: IndicatorSnapshot) -> Self {
        self.indicators = indicators;
        self
    }

    #[must_use]
    pub fn with_features(mut self, features: Vec<f64>) -> Self {
        self.features = features;
        self
    }
}
