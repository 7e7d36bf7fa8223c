// src/lib.rs

//! Listing Alert Library
//!
//! Polls saved marketplace searches and notifies their owners about
//! listings they have not seen before.

pub mod error;
pub mod models;
pub mod pipeline;
pub mod services;
pub mod storage;
pub mod utils;
