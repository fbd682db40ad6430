//! A typed client for the render-ws REST API: the tile-metadata server that every other
//! stage of the pipeline uploads to or downloads from.
//!
//! Nothing here touches tile pixel data directly except [`RenderClient::get_bb_image`],
//! which the exporters use to pull rendered crops back out of the server.

mod clobber;
mod client;
mod config;
mod dto;

pub use clobber::ClobberPolicy;
pub use client::RenderClient;
pub use config::{Credentials, RenderConfig};
pub use dto::{MatchesDto, PointMatchDto, StackBounds, StackMetadata, TileBounds};
