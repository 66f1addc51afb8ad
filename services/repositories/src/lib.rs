//! Identity-scoped repository library crate.
//!
//! # Purpose
//! Exposes the record-oriented repositories for orgs, spaces, routes, builds,
//! deployments, service plans and roles, together with the primitives they
//! compose: identity-scoped clients, the permission index, the fan-out lister,
//! the global locator and the condition awaiter.
//!
//! # Notes
//! The backend is reached only through [`store::ObjectClient`]; the in-memory
//! backend in [`store::memory`] evaluates access the same way a real control
//! plane would, so tests exercise authorization end to end.
pub mod authorization;
pub mod client;
pub mod config;
pub mod errors;
pub mod model;
pub mod observability;
pub mod repositories;
pub mod store;
