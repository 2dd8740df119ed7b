//! Drivers own a registry and feed observations through the notification gate.

pub mod poll;
pub mod stream;
