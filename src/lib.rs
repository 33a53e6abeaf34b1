#![forbid(unsafe_code)]

//! Trending-video thumbnail collector.
//!
//! The library holds the whole collection pipeline so the binary stays a thin
//! composition root: `discovery` finds and filters videos, `thumbnails`
//! downloads their images, `metadata` stages one CSV row per video, and
//! `batches` decides when staging is full enough to rotate into a new batch.

pub mod batches;
pub mod collector;
pub mod config;
pub mod discovery;
pub mod metadata;
pub mod metrics;
pub mod thumbnails;
pub mod youtube;
