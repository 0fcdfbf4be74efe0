pub mod api;
pub mod app;
pub mod blob;
pub mod cli;
pub mod config;
pub mod global;
pub mod store;
pub mod transcription;
