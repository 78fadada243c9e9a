//! Line bridge from an external broker client
//!
//! Reads `topic payload` lines, for example from
//! `mosquitto_sub -v -t 'coffeeMachine/#' | brewwatch-hub --stdin`, and feeds
//! them into the pipeline.

use anyhow::{Context, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, info, instrument, trace};

use crate::pipeline::PipelineHandle;
use crate::telemetry::split_bridge_line;

/// Forward every line of `reader` until end of input
///
/// Returns the number of messages handed to the pipeline. Blank lines are
/// skipped; everything else is forwarded as is and validated downstream.
#[instrument(skip_all)]
pub async fn forward_lines<R>(reader: R, pipeline: &PipelineHandle) -> Result<u64>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut forwarded = 0u64;

    debug!("starting line bridge");

    while let Some(line) = lines.next_line().await.context("failed to read bridge input")? {
        let Some((topic, payload)) = split_bridge_line(&line) else {
            trace!("skipping blank line");
            continue;
        };

        pipeline
            .publish(topic, payload.as_bytes())
            .await
            .context("pipeline stopped accepting messages")?;
        forwarded += 1;
    }

    info!("line bridge reached end of input after {forwarded} messages");
    Ok(forwarded)
}
