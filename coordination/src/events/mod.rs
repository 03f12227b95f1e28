//! Event stream for deliberation observers
//!
//! The orchestrator publishes one event per phase boundary; the server
//! forwards them to WebSocket clients and keeps a replayable history.
//!
//! # Architecture
//!
//! 1. **Event Types** (`types.rs`): the [`DiscoveryEvent`] catalogue and
//!    the numbered [`EventEnvelope`] it travels in.
//!
//! 2. **Event Bus** (`bus.rs`): Tokio broadcast pub/sub plus synchronous
//!    listeners whose failures are contained.
//!
//! 3. **Event History** (`history.rs`): bounded ring buffer for late
//!    subscribers.
//!
//! # Event Flow
//!
//! ```text
//! ┌──────────────┐     ┌──────────────┐     ┌──────────────┐
//! │ Orchestrator │────▶│  Event Bus   │────▶│  Subscribers │
//! │  (publish)   │     │  (broadcast) │     │ (ws clients) │
//! └──────────────┘     └──────┬───────┘     └──────────────┘
//!                             │
//!                      ┌──────┴───────┐
//!                      ▼              ▼
//!               ┌────────────┐ ┌────────────┐
//!               │  History   │ │ Listeners  │
//!               │ (bounded)  │ │   (sync)   │
//!               └────────────┘ └────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use coordination::events::{DiscoveryEvent, EventBus};
//!
//! let bus = EventBus::new().shared();
//! let mut receiver = bus.subscribe();
//!
//! bus.publish(DiscoveryEvent::ExplorationStarted {
//!     topic: "Dark matter".to_string(),
//!     agents: 11,
//! });
//!
//! let envelope = receiver.recv().await?;
//! assert_eq!(envelope.event_type(), "exploration_started");
//! ```

pub mod bus;
pub mod history;
pub mod types;

pub use bus::{EventBus, EventBusExt, EventFilter, FilteredReceiver, Listener, SharedEventBus};
pub use history::{EventHistory, EventStats, DEFAULT_HISTORY_SIZE};
pub use types::{DiscoveryEvent, EventEnvelope, SessionEndReason};
