//! Request governance pipeline for toolgov
//!
//! Chains the detection and decision stages every agent action passes
//! through: injection screening → authority validation → misuse detection →
//! boundary-policy evaluation → tamper-evident sealing. The single entry
//! point is [`RequestGovernor::govern`].

pub mod cost;
pub mod governor;
pub mod policy;
pub mod proof;

pub use cost::{CostEstimator, ModelPricing};
pub use governor::RequestGovernor;
pub use policy::PolicyEngine;
pub use proof::ProofSealer;
