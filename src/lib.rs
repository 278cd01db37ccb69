pub mod config;
pub mod db;
pub mod error;
pub mod export;
pub mod import;
pub mod models;
pub mod report;
pub mod risk;
pub mod roles;
pub mod service;
pub mod store;

pub use import::validate_import;
pub use risk::{classify_tier, compute_risk, RiskAssessment, RiskTier};
