//! # laundry-core
//!
//! State sync and notification coalescing for the laundry status bot.
//!
//! ## Key Components
//!
//! - [`MachineRegistry`]: Remaining minutes for every configured washer and dryer
//! - [`Ticker`]: Converts elapsed wall time into minutes of decay
//! - [`TelemetryBridge`]: Decodes machine telemetry and queues it from any thread
//! - [`NotificationCoalescer`]: One live status message, at most one delivery in flight
//! - [`Engine`]: The single task that applies every mutation and drives delivery
//! - [`StatusRenderer`]: Caption text and PNG status board
//! - [`LaundryConfig`]: YAML plus environment configuration

pub mod coalescer;
pub mod config;
pub mod engine;
pub mod registry;
pub mod render;
pub mod telemetry;
pub mod ticker;

pub use coalescer::{Cycle, NotificationCoalescer};
pub use config::{ConfigError, LaundryConfig};
pub use engine::{Engine, EngineConfig, EngineError, EngineHandle};
pub use registry::{
    BankLayout, ChangeSet, MachineRecord, MachineRegistry, RegistryError, RegistrySnapshot,
};
pub use render::{Render, RenderError, StatusRenderer, Tier, status_text};
pub use telemetry::{Directive, TelemetryBridge, TelemetryError, TelemetryEvent, TopicScheme};
pub use ticker::{DecayClock, Ticker};
