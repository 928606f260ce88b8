//! Shared building blocks for the Comfy MCP server.
//!
//! Holds the startup configuration, the workflow job template and its
//! prompt binder, artifact file naming, and the MCP client-config
//! read-merge-write helpers used by the setup tool.

pub mod client_config;
pub mod config;
pub mod error;
pub mod naming;
pub mod template;
