//! # fittrack - Fitness Telemetry and Food Diary Client
//!
//! The data layer of the fittrack mobile client: live pulse, step and
//! calorie telemetry streamed over WebSocket, and a per-user food diary
//! ledger with daily nutrition totals.
//!
//! ## Features
//!
//! - **Live telemetry**: named channels with replay-one, multi-subscriber delivery
//! - **Reconnect policy**: fixed or exponential backoff with jitter and attempt caps
//! - **Food diary**: append-only per-user ledger persisted as JSON
//! - **Daily totals**: calories, protein, fat and carbohydrates per day
//! - **Library + Binary**: embed the client or drive it from the CLI
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use fittrack::{ClientConfig, FitnessClient, LedgerEntry, UserScope};
//! use futures_util::StreamExt;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = FitnessClient::with_websocket(ClientConfig::new("diary"), None)?;
//!     client.sign_in(UserScope::new("alice@example.com")?);
//!
//!     client.connect("pulse", "ws://localhost:8080/pulse");
//!     let mut pulse = client.subscribe("pulse");
//!     if let Some(bpm) = pulse.next().await {
//!         println!("pulse: {}", bpm);
//!     }
//!
//!     let entry = LedgerEntry::builder("2024-01-10", "Oatmeal").calories(300.0).build()?;
//!     let day = client.append(entry).await?;
//!     println!("{} kcal today", day.totals.calories);
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod diary;
pub mod error;
pub mod stream;

// Re-export public API
pub use client::FitnessClient;
pub use config::ClientConfig;
pub use diary::{
    aggregate, aggregate_all, DailyAggregate, LedgerEntry, LedgerStore, MealCategory, Nutrients,
    Provenance, UserScope,
};
pub use error::{FitError, Result};
pub use stream::{
    channels, decode_int, ConnectionState, FailureReason, ReconnectPolicy, Reconnector,
    StreamConnection, StreamManager, Transport, WebSocketTransport,
};

/// The default delay between reconnect attempts in milliseconds
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 5_000;

/// The default bound on a single connection attempt in milliseconds
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;

/// The default number of values buffered per channel
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// The default ledger directory
pub const DEFAULT_DATA_DIR: &str = "fittrack-data";
