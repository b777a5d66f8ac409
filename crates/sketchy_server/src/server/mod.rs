#![forbid(unsafe_code)]

pub mod auth;
pub mod broadcast;
pub mod connection;
pub mod directory;
pub mod events;
pub mod registry;
pub mod rooms;

#[cfg(test)]
mod events_tests;
