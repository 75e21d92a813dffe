//! # Event-Flow Orchestration Core
//!
//! Workspace umbrella for the event-flow orchestration engine. The root crate
//! carries no library code; it exists to host the end-to-end scenario tests
//! under `tests/` that exercise the workspace crates together:
//!
//! - `eventflow-shared`: data model, state store, messaging, graph registry
//! - `eventflow-orchestration`: the orchestrator (flow lifecycle, dispatch)
//! - `eventflow-worker`: processor trait, registry, runtime, worker loop
//!
//! See each crate's documentation for its API.
