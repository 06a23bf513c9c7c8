//! Integration event tests: broker consumer, domain-to-broker relay and
//! module runtime wiring.

#[path = "../support/mod.rs"]
mod support;

mod consumer;
