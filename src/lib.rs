// Core modules
pub mod core;

// Configuration
pub mod config;

// Indicator and signal engine
pub mod algo;

// Direction filter (pretrained classifier gate)
pub mod model;

// Capital ledger
pub mod wallet;

// External collaborator seams and adapters
pub mod broker;
pub mod notify;

// Position sizing and order orchestration
pub mod trading;

// Trade ledger and reconciliation
pub mod ledger;

// Performance analytics
pub mod analytics;

// Re-export commonly used types for convenience
pub use crate::core::*;
