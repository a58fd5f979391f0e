//! Plinth server library - exposes modules for integration testing.

pub mod config;
pub mod demo;
pub mod gateway;
pub mod logging;
