//! Thin CLI glue: argument parsing and subcommand dispatch for the `render-pipeline` binary.
//! Every stage's actual logic lives in [`render_pipeline`]; this crate only builds
//! [`config::RunConfig`] from CLI flags and hands it off.

pub mod auth;
pub mod commands;
pub mod config;
