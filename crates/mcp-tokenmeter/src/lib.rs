//! Measure the prompt-token cost of an MCP server.
//!
//! The pipeline launches a server over stdio, enumerates its tools, prompts,
//! resources and resource templates, renders each definition to canonical
//! JSON and counts cl100k tokens for it. The report layer folds those counts
//! into per-category summaries.

pub mod config;
pub mod error;
pub mod mcp;
pub mod report;
pub mod serialize;
pub mod tokens;

pub use error::{
    ConnectionError, EnumerationError, FetchError, InitializationError, RpcFailure,
};
pub use mcp::{
    Capabilities, Capability, Category, Definition, FetchOptions, FetchResult, LaunchSpec,
    ServerInfo, fetch_definitions,
};
pub use report::{CategorySummary, Report, aggregate};
pub use tokens::Tokenizer;
