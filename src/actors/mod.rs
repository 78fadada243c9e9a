//! Actor-based ingestion pipeline
//!
//! Each actor runs as an independent task and talks to the others over Tokio
//! channels.
//!
//! ```text
//!                 ┌───────────────┐
//!   transport ──► │  IngestActor  │  topic routing + payload parsing
//!                 └───────┬───────┘
//!                         │ machine_id % n
//!          ┌──────────────┼──────────────┐
//!   ┌──────▼──────┐              ┌──────▼──────┐
//!   │ Worker 0    │     ...      │ Worker n-1  │  state store + alert evaluator
//!   └──────┬──────┘              └──────┬──────┘
//!          │ try_send                   │
//!          └──────────────┬─────────────┘
//!                 ┌───────▼───────┐
//!                 │ NotifierActor │  log / Discord / webhook
//!                 └───────────────┘
//! ```
//!
//! ## Communication Patterns
//!
//! 1. **Commands**: every actor owns an mpsc command channel
//! 2. **Events**: workers publish [`messages::PipelineEvent`]s on a broadcast channel
//! 3. **Request/Response**: oneshot channels for flushes, stats and operator actions

pub mod ingest;
pub mod machine;
pub mod messages;
pub mod notifier;
