// src/lib.rs

//! jobwatch: relays fresh job postings from a public search endpoint to
//! chat channels, each posting at most once per channel.

pub mod config;
pub mod error;
#[cfg(feature = "lambda")]
pub mod lambda;
pub mod models;
pub mod notify;
pub mod pipeline;
pub mod services;
pub mod storage;
pub mod utils;
