//! Core library for the `geoweather` tool.
//!
//! This crate defines:
//! - Reading the last known position from location providers
//! - Requesting current weather for that position and decoding the reply
//! - The fetch orchestrator tying those steps together
//! - Configuration & credentials handling
//!
//! It is used by `geoweather-cli`, but any front end can drive a
//! [`FetchOrchestrator`] and display what its observer reports.

pub mod client;
pub mod config;
pub mod decode;
pub mod error;
pub mod location;
pub mod model;
pub mod orchestrator;
pub mod permission;

pub use client::{WeatherClient, WeatherSource};
pub use config::Config;
pub use decode::decode;
pub use error::{DecodeError, FetchError, LocationError, TransportError};
pub use location::{LocationAdapter, LocationPlatform, LocationSource, StaticPlatform};
pub use model::{Coordinate, FailureKind, FetchResult, Fix, WeatherSummary};
pub use orchestrator::{ChannelObserver, FetchEvent, FetchObserver, FetchOrchestrator};
pub use permission::{PermissionOutcome, PermissionPrompt, PermissionRetry};
