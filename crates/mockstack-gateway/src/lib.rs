//! Single-endpoint HTTP gateway for MockStack.
//!
//! A [`MockServer`] owns a [`MockRegistry`] of service mocks. Every request
//! arriving on the listener is resolved to a service name from its headers
//! (see [`resolver`]), buffered, and handed to the matching mock. Requests
//! that resolve to no registered mock get a plain-text `400`.

pub mod gateway;
pub mod registry;
pub mod resolver;
pub mod server;

mod error;

pub use error::{GatewayError, RoutingError};
pub use gateway::{GatewayService, HEALTH_PATH, RESET_PATH};
pub use registry::MockRegistry;
pub use resolver::{Resolution, ResolutionSource, resolve_service};
pub use server::{MockServer, RunningServer};
