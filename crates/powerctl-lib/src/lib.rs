//! powerctl: per-application power and device setting profiles.

pub mod config;
pub mod control;
pub mod controller;
pub mod engine;
pub mod error;
pub mod foreground;
pub mod group;
pub mod guard;
pub mod scheduler;
pub mod setting;
pub mod shell;
pub mod store;
pub mod value;

pub use error::PowerctlError;
