pub mod app;
pub mod auth;
pub mod authz;
pub mod cli;
pub mod config;
pub mod database;
pub mod devices;
pub mod dispatcher;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod services;
pub mod state;
pub mod sync;
pub mod whatsapp;

#[cfg(test)]
pub mod testing;
