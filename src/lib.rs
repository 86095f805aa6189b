#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::return_self_not_must_use
)]

pub mod agent;
pub mod bus;
pub mod config;
pub mod discovery;
pub mod harness;
pub mod providers;
pub mod tools;
pub mod util;

pub use config::Config;
