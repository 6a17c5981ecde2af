// thiserror's #[error("...{field}...")] format strings reference struct fields,
// but the compiler doesn't see through the derive macro and reports false positives.
#![allow(unused_assignments)]

//! # medgate
//!
//! A clinical agent orchestration and verification engine. A supervisor
//! classifies each request, delegates to specialist reasoning loops, drafts
//! an answer from their evidence and gates it through an independent
//! adjudicator before anything is released.
//!
//! ## Architecture
//!
//! - **Tools** (`tool`): JSON-schema validated capability registry plus the built-in clinical tools
//! - **Temporal graph** (`graph`): entities and interval-stamped relations with point-in-time queries
//! - **Agents** (`agent`): ReAct loop, specialists, supervisor and adjudicator
//! - **Workflows** (`workflow`): sessions, step traces and the cancellable event stream
//! - **Providers** (`provider`): generation, retrieval and vision capabilities
//! - **Store** (`store`): redb-backed graph snapshots and session archive
//!
//! ## Library usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use medgate::config::EngineConfig;
//! use medgate::graph::TemporalGraph;
//! use medgate::provider::ScriptedGenerator;
//! use medgate::tool::{builtin, ToolRegistry};
//! use medgate::workflow::WorkflowEngine;
//! use tokio_stream::StreamExt;
//!
//! # async fn demo() -> medgate::error::MedgateResult<()> {
//! let graph = Arc::new(TemporalGraph::new());
//! let mut tools = ToolRegistry::new();
//! builtin::register_builtin_tools(&mut tools, Arc::clone(&graph), builtin::Capabilities::default())?;
//!
//! let generator = Arc::new(ScriptedGenerator::default());
//! let engine = WorkflowEngine::new(EngineConfig::default(), generator, tools, graph);
//! let mut run = engine.run_workflow("Is warfarin safe with aspirin?", Some("medication"))?;
//! while let Some(event) = run.next().await {
//!     println!("{}", serde_json::to_string(&event).unwrap());
//! }
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod config;
pub mod error;
pub mod graph;
pub mod paths;
pub mod provider;
pub mod store;
pub mod tool;
pub mod workflow;
