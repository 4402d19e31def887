//! HMS tenancy engine
//!
//! Per-hospital database lifecycle for a multi-tenant hospital platform:
//! a catalog of tenants, a broker that hands out connections to each
//! tenant's own database, provisioning (create, migrate, activate modules,
//! seed), schema validation against a declarative expected schema and
//! additive convergence towards it.

pub mod auth;
pub mod broker;
pub mod catalog;
pub mod config;
pub mod db;
pub mod error;
pub mod migrator;
pub mod models;
pub mod modules;
pub mod provisioning;
pub mod routes;
pub mod schema;
pub mod seed;
pub mod state;
