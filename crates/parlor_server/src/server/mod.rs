#![forbid(unsafe_code)]

pub mod broker;
pub mod connection;
pub mod guard;
pub mod health;
pub mod history;
pub mod hub;
pub mod presence;
pub mod reactions;
pub mod registry;
pub mod router;
pub mod store;


#[cfg(test)]
mod hub_tests;

#[cfg(test)]
mod quic_broker_tests;
