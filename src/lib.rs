//! Offline request handling for the bionic hand dashboard.
//!
//! A [`worker::ServiceWorker`] intercepts dashboard requests, serves them
//! network-first with cached and synthesized fallbacks, and queues device
//! actions for delivery once connectivity returns.

pub mod app;
pub mod cache;
pub mod commands;
pub mod config;
pub mod db;
pub mod fallback;
pub mod http;
pub mod logging;
pub mod queue;
pub mod sync;
pub mod worker;

#[cfg(test)]
mod testing;
