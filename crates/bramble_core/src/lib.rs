#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

/// Error (common error types)
pub mod error;

/// The append-only revision log and historical reconstruction
pub mod history;

/// Short-lived optimistic edit locks
pub mod lock;

/// Markdown rendering and text extraction for page content
pub mod markdown;

/// Page and revision data types
pub mod page;

/// Patch computation, encoding, application, and rendering
pub mod patch;

/// Storage backends for pages and revision logs
pub mod store;

/// The wiki facade over a store
pub mod wiki;
