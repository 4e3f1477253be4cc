//! Presence and service discovery over a hierarchical, versioned,
//! watch-capable store.
//!
//! Processes announce `(cluster, service, node)` identities under
//! `<base>/presence/...`, discover peers through a watch-invalidated path
//! cache, and receive typed change notifications through observers.

mod cache;
mod config;
mod constants;
mod errors;
mod path;
mod presence;
mod serializer;
mod store;
mod utils;

pub mod metrics;

pub use cache::*;
pub use config::*;
pub use constants::*;
pub use errors::*;
pub use path::*;
pub use presence::*;
pub use serializer::*;
pub use store::*;
