pub mod auth;
pub mod config;
pub mod crawler;
pub mod db;
pub mod error;
pub mod handlers;
pub mod models;
pub mod queue;
pub mod router;
pub mod state;
