//! MCP server exposing ComfyUI image generation as tools.
//!
//! Speaks JSON-RPC 2.0 over stdio. Protocol traffic owns stdout; all
//! logging goes to stderr.

pub mod error;
pub mod prompt_llm;
pub mod protocol;
pub mod server;
pub mod setup;
pub mod tools;
