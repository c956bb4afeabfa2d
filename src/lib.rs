pub mod batch;
pub mod buffer;
pub mod config;
pub mod event;
pub mod group;
pub mod pipeline;
pub mod processors;
pub mod sized_map;
pub mod stats;
pub mod timefmt;
