pub mod config;
pub mod engine;
pub mod routes;
pub mod web_server;
