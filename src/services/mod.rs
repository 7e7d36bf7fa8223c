//! Service layer for the alert application.
//!
//! This module contains the business logic for:
//! - Listing retrieval (`ListingFetcher`, `KleinanzeigenFetcher`)
//! - Query management (`QueryService`)
//! - Message delivery (`Notifier`, `TelegramNotifier`, `LogNotifier`)
//! - Chat commands (`CommandHandler`)

mod commands;
mod fetcher;
mod notifier;
mod queries;
mod telegram;

pub use commands::{Command, CommandHandler};
pub use fetcher::{
    CompiledSelectors, KleinanzeigenFetcher, ListingFetcher, LocationSuggestions, PriceFilter,
    parse_listings,
};
pub use notifier::{LogNotifier, Notifier, TelegramNotifier};
pub use queries::QueryService;
pub use telegram::{Chat, IncomingMessage, TelegramClient, Update, is_markup_error};
