//! CVR matchmaking and gateway server library.
//! This crate exposes internal modules for integration testing.
//! The binary entry point is in main.rs.

pub mod audit;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod matchmaking;
pub mod moderation;
pub mod players;
pub mod presence;
pub mod rooms;
pub mod routes;
pub mod shutdown;
pub mod state;
pub mod ws;
