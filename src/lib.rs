//! # Codeloom
//!
//! Code intelligence for an AI coding assistant. The analytical services
//! (virtual compilation host, structural search, relevance scoring) live in
//! [`codeloom_core`]; this crate wraps them as model-callable tools and
//! drives a bounded tool-calling loop across two model providers.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   snapshot   ┌──────────────────────────────┐
//! │ ProjectStore │─────────────▶│ codeloom-core                │
//! │ (fs / memory)│              │ host · search · relevance    │
//! └──────┬───────┘              └──────────────┬───────────────┘
//!        │ read/write                          │
//!        ▼                                     ▼
//!   ┌──────────────────── ToolRegistry ───────────────────┐
//!   └───────────────────────────┬─────────────────────────┘
//!                               ▼
//!   ┌──────────────── Orchestrator ───────────────────────┐
//!   │ primary (OpenAI-compatible) ─▶ fallback (Ollama)    │
//!   └──────────┬───────────────────────────┬──────────────┘
//!              ▼                           ▼
//!         ┌─────────┐                 ┌─────────┐
//!         │  CLI    │                 │  HTTP   │
//!         │ (loom)  │                 │ server  │
//!         └─────────┘                 └─────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`conversation`] | Canonical messages and tool-call union |
//! | [`traits`] | `Tool` trait, resource claims, registry |
//! | [`tools`] | Built-in analytical and file tools |
//! | [`providers`] | OpenAI-compatible and Ollama clients |
//! | [`orchestrator`] | Step loop, dependency waves, fallback |
//! | [`observer`] | Step callbacks and streamed-text sinks |
//! | [`retry`] | Whole-run retry policy |
//! | [`fs_store`] | Local filesystem project store |
//! | [`server`] | HTTP server |
//! | [`telemetry`] | `tracing` subscriber setup |

pub use codeloom_core as core;

pub mod config;
pub mod conversation;
pub mod fs_store;
pub mod observer;
pub mod orchestrator;
pub mod providers;
pub mod retry;
pub mod server;
pub mod telemetry;
pub mod tools;
pub mod traits;
