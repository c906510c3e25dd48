//! Library crate for ping-plot exposing reusable modules.
pub mod chart;
pub mod clock;
pub mod config;
pub mod logger;
pub mod logline;
pub mod prober;
pub mod render;
pub mod renderer;
pub mod series;
pub mod source;
pub mod types;
