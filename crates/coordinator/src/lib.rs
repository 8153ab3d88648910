//! Authorization-and-dispatch pipeline for tool calls.
//!
//! [`ToolCoordinator`] composes the policy evaluator, the approval gate and
//! the result cache in front of a [`nachos_core::MessageBus`].

pub mod classifier;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod metrics;
pub mod scheduler;

pub use classifier::{default_tier_rules, AccessKind, TierRule, TierSource, ToolClassifier};
pub use config::{CacheSettings, ClassifierSettings, ConfigError, CoordinatorConfig, PolicySettings};
pub use coordinator::{security_request, ExecuteOptions, ToolCoordinator};
pub use error::CoordinatorError;
pub use scheduler::{plan_batch, BatchPlan, ExecutionMode, PlanReason};
