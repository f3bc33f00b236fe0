pub mod app;
pub mod cli;
pub mod config;
pub mod data;
pub mod google;
pub mod json;
pub mod logging;
pub mod services;
pub mod state;
pub mod sync;
pub mod utils;
pub mod web;
