//! Terminal User Interface
//!
//! Interactive front end for the monitor: start and stop polling, watch
//! connect/remove events scroll by, and list the attached devices while idle.
//!
//! # Keybindings
//!
//! - `s`: start monitoring
//! - `x`: stop monitoring
//! - `i`: device info (idle only)
//! - `c`: clear the log
//! - `j`/`k`, arrows: scroll
//! - `?`: help
//! - `q`, `Ctrl+C`: quit

pub mod app;
pub mod events;
pub mod ui;

pub use app::run;
