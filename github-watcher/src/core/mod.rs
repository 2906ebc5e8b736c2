/*!
Core watcher modules
*/

pub mod config;
pub mod event_system;
pub mod lifecycle;
pub mod output_plugins;
pub mod polling_engine;
pub mod state_manager;
