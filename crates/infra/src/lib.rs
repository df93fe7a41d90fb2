//! Infrastructure layer: persistence, configuration, ERP integration and the
//! task orchestration service that ties them to the domain crates.

pub mod config;
pub mod erp;
pub mod event_store;
pub mod orchestration;
pub mod repository;
