//! Client side of the MCP stdio protocol, reduced to what measuring needs:
//! spawn, handshake, paginated listing and shutdown.

pub mod enumerator;
pub mod fetch;
pub mod jsonrpc;
pub mod session;
pub mod types;

pub use enumerator::{DefinitionSource, Enumeration, Page, collect_definitions, enumerate};
pub use fetch::{FetchOptions, fetch_definitions};
pub use session::{Session, SessionOptions};
pub use types::*;
