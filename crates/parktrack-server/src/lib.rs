//! # parktrack-server
//!
//! HTTP server library for the parktrack beacon tracker.
//!
//! This library provides the API handlers, application state and logging
//! setup used by the `parktrack-server` daemon.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

pub mod api;
pub mod logging;
pub mod state;
