//! API shared state

use chrono::{DateTime, Utc};

use crate::pipeline::PipelineHandle;

/// Shared state passed to all API handlers
#[derive(Clone)]
pub struct ApiState {
    /// Handle to the running pipeline; also gives access to storage
    pub pipeline: PipelineHandle,

    /// When the hub started, for uptime reporting
    pub started_at: DateTime<Utc>,
}

impl ApiState {
    pub fn new(pipeline: PipelineHandle) -> Self {
        Self {
            pipeline,
            started_at: Utc::now(),
        }
    }
}
