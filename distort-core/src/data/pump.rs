//! Socket-to-queue frame pump
//!
//! Drains frames from a connection into a [`BoundedFrameQueue`] so the
//! socket keeps being read while the consumer works on earlier frames.

use tokio::io::AsyncRead;
use tracing::{debug, warn};

use super::queue::{BoundedFrameQueue, QueueFull};
use crate::error::Result;
use crate::metrics::standard;
use crate::protocol::{FrameReader, WireFrame};

/// Counters for one pump run
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PumpStats {
    /// Frames handed to the queue
    pub enqueued: u64,
    /// Frames refused because the queue was full
    pub rejected: u64,
    /// Frames that failed to decode
    pub malformed: u64,
}

/// Read frames until the peer disconnects.
///
/// A frame that cannot be decoded or that finds the queue full is replaced
/// in the queue by an `Error` frame, so the consumer learns of the loss and
/// answers it in order. The pump stops reading until that marker fits. The
/// queue is closed when the pump returns, whether the stream ended cleanly
/// or with an error.
pub async fn pump_frames<R>(
    reader: &mut FrameReader<R>,
    queue: &BoundedFrameQueue,
) -> Result<PumpStats>
where
    R: AsyncRead + Unpin,
{
    let mut stats = PumpStats::default();
    let result = pump_loop(reader, queue, &mut stats).await;
    queue.close();
    debug!(
        "Frame pump finished: {} enqueued, {} rejected, {} malformed",
        stats.enqueued, stats.rejected, stats.malformed
    );
    result.map(|_| stats)
}

async fn pump_loop<R>(
    reader: &mut FrameReader<R>,
    queue: &BoundedFrameQueue,
    stats: &mut PumpStats,
) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    loop {
        match reader.receive_frame().await {
            Ok(Some(frame)) => {
                standard::FRAMES_RECEIVED.inc();
                match queue.enqueue(frame) {
                    Ok(()) => stats.enqueued += 1,
                    Err(QueueFull(frame)) => {
                        stats.rejected += 1;
                        standard::FRAMES_REJECTED.inc();
                        warn!(
                            "Frame queue full ({}), rejecting frame {:?}",
                            queue.capacity(),
                            frame
                        );
                        if !mark_lost(queue).await {
                            return Ok(());
                        }
                    }
                }
            }
            Ok(None) => return Ok(()),
            Err(e) if e.is_decode() => {
                stats.malformed += 1;
                standard::DECODE_FAILURES.inc();
                warn!("Dropping undecodable frame: {}", e);
                if !mark_lost(queue).await {
                    return Ok(());
                }
            }
            Err(e) => return Err(e),
        }
    }
}

/// Queue an `Error` frame in place of a lost one; false if the queue closed
async fn mark_lost(queue: &BoundedFrameQueue) -> bool {
    let mut marker = WireFrame::error();
    loop {
        match queue.enqueue(marker) {
            Ok(()) => return true,
            Err(_) if queue.is_closed() => return false,
            Err(QueueFull(back)) => {
                marker = back;
                queue.wait_for_space().await;
            }
        }
    }
}
