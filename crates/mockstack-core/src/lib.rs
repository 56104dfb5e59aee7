//! Core types, configuration, and state management for MockStack.
//!
//! This crate provides the building blocks shared by every emulated service:
//!
//! - [`MockStackConfig`]: environment-driven configuration
//! - [`ResourceScope`]: the fixed account and region every ARN is
//!   synthesized under
//! - [`ids`]: fixed-width random identifiers
//! - [`Params`] / [`Value`]: the loosely-typed request/response bag every
//!   protocol codec decodes into and encodes from
//! - [`ResourceStore`]: the reader/writer-locked keyed collection with
//!   optimistic-lock tokens, deterministic ordering and pagination

mod config;
mod error;
pub mod ids;
mod params;
mod scope;
mod store;

pub use config::{MockStackConfig, parse_services_value};
pub use error::{MockStackError, MockStackResult, ParamError, StoreError};
pub use params::{Params, Value, format_iso8601};
pub use store::{ListOrder, LockToken, Mutation, Page, Record, Resource, ResourceStore};
pub use scope::{DEFAULT_ACCOUNT, DEFAULT_REGION, ResourceScope};
