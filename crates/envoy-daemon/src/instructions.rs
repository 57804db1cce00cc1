//! Newline-delimited JSON instruction source

use envoy_core::{AgentsRouter, Instruction};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Feed each instruction line to the router until EOF or shutdown.
///
/// Instructions are processed one at a time, in the order received. An
/// instruction already being processed is finished before shutdown.
pub async fn read_instructions<R>(reader: R, router: Arc<AgentsRouter>, ctx: CancellationToken)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();

    loop {
        let line = tokio::select! {
            _ = ctx.cancelled() => break,
            line = lines.next_line() => line,
        };

        match line {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match parse_instruction(line) {
                    Ok(instruction) => router.process_instruction(instruction).await,
                    Err(e) => warn!(error = %e, "ignoring malformed instruction"),
                }
            }
            Ok(None) => {
                info!("instruction input closed");
                break;
            }
            Err(e) => {
                warn!(error = %e, "failed to read instructions");
                break;
            }
        }
    }

    debug!("instruction reader stopped");
}

fn parse_instruction(line: &str) -> serde_json::Result<Instruction> {
    serde_json::from_str(line)
}
