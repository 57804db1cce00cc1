//! Agent output forwarding and readiness detection

use crate::types::{AgentType, OutputStream};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Longest line forwarded as one entry, longer lines are split
pub(crate) const MAX_LINE_LEN: usize = 64 * 1024;

/// Receives every line an agent writes to stdout or stderr
pub trait OutputSink: Send + Sync {
    fn forward(&self, agent_type: AgentType, stream: OutputStream, line: &str);
}

/// Sink that re-emits agent output as tracing events
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingOutputSink;

impl OutputSink for TracingOutputSink {
    fn forward(&self, agent_type: AgentType, stream: OutputStream, line: &str) {
        info!(agent_type = %agent_type, stream = %stream, "{}", line);
    }
}

/// Readiness reporting for one output reader.
///
/// Publishes `true` when the marker is seen and `false` when the stream ends
/// before it was seen. The channel holds a single result, later reports are
/// dropped.
pub(crate) struct ReadinessReport {
    pub marker: Option<String>,
    pub result_tx: mpsc::Sender<bool>,
}

impl ReadinessReport {
    fn publish(&self, ready: bool) {
        let _ = self.result_tx.try_send(ready);
    }
}

/// Forward lines from one agent pipe to the sink until EOF or cancellation
pub(crate) async fn forward_output<R>(
    reader: R,
    stream: OutputStream,
    agent_type: AgentType,
    sink: Arc<dyn OutputSink>,
    cancel: CancellationToken,
    readiness: ReadinessReport,
) where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    let mut checking = readiness.marker.is_some();

    loop {
        buf.clear();
        let mut limited = (&mut reader).take(MAX_LINE_LEN as u64);
        let read = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            read = limited.read_until(b'\n', &mut buf) => read,
        };

        match read {
            Ok(0) => {
                if checking {
                    readiness.publish(false);
                }
                break;
            }
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end_matches(['\n', '\r']);
                sink.forward(agent_type, stream, line);

                if checking {
                    if let Some(marker) = readiness.marker.as_deref() {
                        if line.contains(marker) {
                            debug!(agent_type = %agent_type, "saw expected content");
                            readiness.publish(true);
                            checking = false;
                        }
                    }
                }
            }
            Err(e) => {
                warn!(agent_type = %agent_type, error = %e, "while reading command's {}", stream);
                if checking {
                    readiness.publish(false);
                }
                break;
            }
        }
    }

    debug!(agent_type = %agent_type, "stopping command {} forwarding to logs", stream);
}
