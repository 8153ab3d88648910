use crate::config::ConfigError;
use nachos_core::BusError;
use nachos_policy::PolicyError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Policy error: {0}")]
    Policy(#[from] PolicyError),

    #[error("Dispatch failed: {0}")]
    Dispatch(#[from] BusError),
}
