#![doc = include_str!("../README.md")]
pub mod config;
pub mod error;
pub mod logging;
pub mod processor;
pub mod util;
