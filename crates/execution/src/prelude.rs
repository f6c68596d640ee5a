//! Prelude module for convenient imports.
//!
//! This module re-exports the most commonly used types from the crate.
//!
//! # Example
//!
//! ```rust
//! use dexbot_execution::prelude::*;
//! ```

// Configuration
pub use crate::config::EngineConfig;

// Emergency
pub use crate::emergency::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, CircuitState};

// Engine
pub use crate::engine::{Engine, EngineParts, MarketFeed};

// Executor
pub use crate::executor::{ExecutorConfig, NonceManager, Settlement, TradeExecutor};

// Lifecycle
pub use crate::lifecycle::{
    AggregateStats, LifecycleEvent, LifecycleEventType, PerformanceReport, PerformanceTracker,
};

// Position
pub use crate::position::{ExposureLimits, ExposureSnapshot, PositionManager, PositionManagerConfig};

// Risk
pub use crate::risk::{FnRule, RiskConfig, RiskContext, RiskEngine, RiskRule, RuleOutcome};

// Scheduler
pub use crate::scheduler::{ScheduledTask, Scheduler};

// Store
pub use crate::store::InMemoryTradeStore;

// Strategy
pub use crate::strategy::{
    MacdConfig, MacdStrategy, MlConfig, MlStrategy, RsiConfig, RsiStrategy, Strategy,
    StrategyConfig, StrategyManager, StrategySpec, TrendConfig, TrendStrategy,
};

// Sync
pub use crate::sync::{EventHandler, EventListener, EventListenerConfig, FilterCursor};
