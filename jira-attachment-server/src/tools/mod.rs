//! Tools module for the JIRA attachment server
//!
//! Contains the MCP tools for publishing attachments and managing their cleanup.

pub mod cleanup_files;
pub mod publish_attachment;

pub use cleanup_files::*;
pub use publish_attachment::*;
