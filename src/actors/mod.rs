//! Actor-based polling pipeline
//!
//! Each actor runs as an independent async task and is controlled through a
//! cloneable handle that talks to it over an mpsc command channel.
//!
//! ## Architecture Overview
//!
//! ```text
//!    ┌──────────────┐   ┌──────────────┐         ┌──────────────┐
//!    │ Collector #0 │   │ Collector #1 │   ...   │ Collector #N │
//!    │  (systemd)   │   │   (helper)   │         │              │
//!    └──────┬───────┘   └──────┬───────┘         └──────┬───────┘
//!           │ one event per node per tick               │
//!           └─────────────────┬──────────────────────────┘
//!                             │
//!                  ┌──────────▼──────────┐
//!                  │   Delivery queue    │ (unbounded mpsc)
//!                  └──────────┬──────────┘
//!                             │
//!                  ┌──────────▼──────────┐
//!                  │    StorageActor     │──► persistence tasks ──► SQLite
//!                  └─────────────────────┘
//! ```
//!
//! The health report is computed on the request path straight from the
//! storage backend and never goes through an actor.
//!
//! ## Actor Types
//!
//! - **UnitCollectorActor**: probes its nodes on every tick
//! - **StorageActor**: prunes, deduplicates and inserts unit batches

pub mod collector;
pub mod messages;
pub mod storage;
