//! vigil: a host monitoring agent that tails service logs, extracts and
//! deduplicates error blocks, streams live logs to viewers and exposes an
//! HTTP control API.

pub mod cli;
pub mod config;
pub mod extract;
pub mod health;
pub mod monitor;
pub mod service;
pub mod source;
pub mod storage;
pub mod stream;
pub mod web;
