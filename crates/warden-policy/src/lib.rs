//! Risk classification, policy snapshot, and the allow/deny/prompt decision engine.

pub mod config;
pub mod decision;
pub mod risk;

pub use config::{
    DEFAULT_TOOL_TIMEOUT_MS, ModeMisconfiguration, PolicyMode, RiskConfig, SecurityConfig,
    ServerPolicy,
};
pub use decision::{DecisionEngine, DecisionReason, Evaluation, SecurityDecision};
pub use risk::{RiskClassifier, RiskTier};
