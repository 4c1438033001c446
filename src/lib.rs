//! Thumbnail worker
//!
//! Consumes image-thumbnailing tasks from a message queue, resizes the source
//! image, tracks each job's lifecycle in PostgreSQL, and announces finished
//! thumbnails on a completion queue.

pub mod app_state;
pub mod config;
pub mod db;
pub mod models;
pub mod routes;
pub mod services;
pub mod worker;
