//! HTTP API: ride ingestion and the read-side skier/resort queries.

pub mod app;
