//! The pipeline proper: everything between a project directory of raw acquisition tiles and a
//! CATMAID/WebKnossos export, built on the render-server client and geometry crates.
//!
//! Stages run in this order, each consuming the previous one's output stack(s):
//! [`postcorrect`] (optional) → [`mipmap`] + [`ingest`] → [`upload`] → [`stitch`] →
//! (external montage solve) → [`export`].

pub mod export;
pub mod ingest;
pub mod mipmap;
pub mod postcorrect;
pub mod stitch;
pub mod upload;
