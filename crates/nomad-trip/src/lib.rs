//! Nomad Trip marketplace core: accounts, company and driver profiles, and the
//! moderated driver/company affiliation workflow.

pub mod accounts;
pub mod clock;
pub mod config;
pub mod error;
pub mod marketplace;
pub mod memory;
pub mod repository;
pub mod storage;
pub mod telemetry;
