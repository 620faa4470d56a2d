//! Stream Control Vertex core: the concurrent stream/target lifecycle
//! manager that custodies a pool of simulation streams, hands them out to
//! compute cores on activation, and reclaims them on deactivation.
//!
//! The lock hierarchy is always acquired Manager -> Target -> Stream; see
//! [`Manager`] for the operations built on top of it.

pub mod config;
pub mod error;
pub mod ids;
pub mod injector;
pub mod logging;
pub mod manager;
pub mod stream;
mod target;
pub mod token;

pub use config::ServiceConfig;
pub use error::{Error, InvalidTokenKind, Result};
pub use ids::{StreamId, TargetId};
pub use injector::{DeactivatedStream, Injector, LoggingInjector};
pub use manager::Manager;
pub use stream::{ActiveStream, MongoStatus, Stream};
pub use target::TargetStats;
pub use token::AuthToken;
