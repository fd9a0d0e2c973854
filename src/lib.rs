//! Spotter - Gym Membership Backend
//!
//! This crate implements the billing-event reconciliation engine that keeps
//! persisted membership state consistent with the payment provider.

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;
