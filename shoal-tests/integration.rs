//! Integration tests for Shoal
//!
//! These tests drive the engine facade the way the API server and CLI do,
//! checking component interactions: ingestion into the registry, swarm
//! session lifecycle, peer accounting, and telemetry aggregation.

#[path = "integration/harness.rs"]
mod harness;

#[path = "integration/ingest_flow.rs"]
mod ingest_flow;

#[path = "integration/swarm_lifecycle.rs"]
mod swarm_lifecycle;

#[path = "integration/telemetry_aggregation.rs"]
mod telemetry_aggregation;

#[path = "integration/peer_churn.rs"]
mod peer_churn;

#[path = "integration/web_flow.rs"]
mod web_flow;
