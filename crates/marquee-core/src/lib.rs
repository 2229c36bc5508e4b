//! Marquee Core - Playback Orchestration Library for Marquee
//!
//! This crate provides the orchestration layer of the Marquee player:
//! - Stream type resolution and engine selection (HLS, DASH, native)
//! - Engine lifecycle with classed error recovery and bounded restarts
//! - Ad break planning and the ad scheduler state machine
//! - A single reactive store every collaborator reads and writes through
//! - Episode navigation with next-episode auto-advance
//! - Durable watch-time tracking with unload reporting
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Marquee Core                             │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐          │
//! │  │    Engine    │  │      Ad      │  │   Playback   │          │
//! │  │   Manager    │  │  Scheduler   │  │ Coordinator  │          │
//! │  └──────┬───────┘  └──────┬───────┘  └──────┬───────┘          │
//! │         │                 │                 │                   │
//! │         └─────────────────┼─────────────────┘                   │
//! │                           │                                     │
//! │                    ┌──────┴──────┐                              │
//! │                    │   Player    │                              │
//! │                    │   Session   │                              │
//! │                    └──────┬──────┘                              │
//! │                           │                                     │
//! │  ┌──────────────┐  ┌──────┴──────┐  ┌──────────────┐           │
//! │  │   Episode    │  │   Player    │  │     View     │           │
//! │  │  Navigator   │  │    Store    │  │   Tracker    │           │
//! │  └──────────────┘  └─────────────┘  └──────────────┘           │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod ads;
pub mod config;
pub mod coordinator;
pub mod engine;
pub mod episodes;
pub mod error;
pub mod media;
pub mod quality;
pub mod session;
pub mod sim;
pub mod source;
pub mod store;
pub mod tracking;
pub mod types;

pub use ads::AdScheduler;
pub use config::{AdSpot, AdsConfig, PlayerConfig, SmartPlacement};
pub use coordinator::PlaybackCoordinator;
pub use engine::{Attachment, EngineFactory, EngineManager, EngineSupport};
pub use episodes::EpisodeNavigator;
pub use error::{Error, Result};
pub use media::{MediaElement, MediaEvent, PlayError, ReadyState};
pub use session::PlayerSession;
pub use source::resolve_stream_type;
pub use store::{PlayerStore, StoreSnapshot};
pub use tracking::{JsonWatchTimeStore, MemoryWatchTimeStore, ViewTracker, WatchTimeStore};
pub use types::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the player library with default configuration
pub fn init() {
    tracing::info!(version = VERSION, "Marquee Core initialized");
}
