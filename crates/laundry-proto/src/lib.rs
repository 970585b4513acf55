//! # laundry-proto
//!
//! Shared types, error definitions, and traits for the laundry status bot.
//!
//! This crate provides the vocabulary every other crate speaks:
//! - Machine addressing ([`MachineClass`], [`SlotKey`])
//! - The outbound notification model ([`ChatTarget`], [`OutboundHandle`], [`Artifact`])
//! - The [`Delivery`] trait that chat transports implement

pub mod delivery;
pub mod machine;

pub use delivery::{Artifact, ChatTarget, Delivered, Delivery, DeliveryError, OutboundHandle};
pub use machine::{MachineClass, ParseClassError, SlotKey};
