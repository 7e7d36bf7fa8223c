// src/models/mod.rs

//! Domain models for the alert service.
//!
//! This module contains all data structures used throughout the application,
//! organized by their primary purpose.

mod config;
mod listing;
mod messages;
mod query;

// Re-export all public types
pub use config::{
    Config, FetcherConfig, ListingSelectors, SchedulerConfig, StorageConfig, TOKEN_ENV,
    TelegramConfig,
};
pub use listing::{Listing, ResolvedLocation, SeenListing};
pub use messages::{Message, Messages, escape_html};
pub use query::{Query, QueryRequest, SearchParams};
