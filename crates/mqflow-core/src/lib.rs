//! mqflow-core - Core delivery types and utilities.
//!
//! This crate provides the fundamental types for MQTT message delivery,
//! shared between the server-side delivery engine and its embedders.

pub mod error;
pub mod qos;

pub use error::{Error, ProtocolError, Result, SendError};
pub use qos::QoS;
