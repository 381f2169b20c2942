//! Aptamer/protein interaction scoring, encoder pretraining and candidate
//! recommendation.
//!
//! The crate is organized around one pipeline model ([`models::aptatrans`])
//! built from reusable blocks ([`building_blocks`]), with training drivers
//! in [`training`], saliency extraction in [`explain`] and the Monte-Carlo
//! recommendation loop in [`search`] and [`recommend`].

pub mod building_blocks;
pub mod data;
pub mod explain;
pub mod models;
pub mod recommend;
pub mod search;
pub mod training;
pub mod utils;
pub mod vocab;
