//! Kuycountry payment backend
//!
//! Issues Midtrans checkout tokens and reconciles the gateway's payment
//! notifications into local order state. Every notification is re-verified
//! against the gateway before it can move an order, and each one is applied at
//! most once.

pub mod api;
pub mod config;
pub mod database;
pub mod error;
pub mod health;
pub mod logging;
pub mod middleware;
pub mod payments;
pub mod services;
