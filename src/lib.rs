pub mod commands;
pub mod config;
pub mod error;
pub mod plugin;
pub mod proxy;
pub mod queue;
pub mod state;
pub mod web;
