// Car state model, windowed history, and resampling
pub mod state;

// Subscriber hub and streaming sessions
pub mod stream;

// MQTT ingestion and topic routing
pub mod ingest;

// Bearer tokens and share links
pub mod auth;

// HTTP APIs
pub mod api;

// Configuration loading
pub mod config;
