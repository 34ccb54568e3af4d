//! Stream utilities for UI-facing subscriptions

mod throttle;

pub use throttle::{Throttle, ThrottleExt};

use futures::{Stream, StreamExt};
use std::sync::Arc;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

use crate::types::{DecodedFrame, UpdateRate};

/// Stream decoded frames from the pipeline's latest-frame channel.
///
/// Frames are delivered latest-first: a slow consumer skips frames rather
/// than queueing them. `rate` is resolved against the stream's nominal frame
/// rate; a cap below it thins delivery to at most that many frames a second.
pub fn frame_stream(
    frames: watch::Receiver<Option<Arc<DecodedFrame>>>,
    rate: UpdateRate,
    stream_fps: f64,
) -> impl Stream<Item = Arc<DecodedFrame>> + Send + 'static {
    let frames = WatchStream::new(frames).filter_map(|frame| async move { frame });

    match rate.throttle_interval(stream_fps) {
        None => frames.boxed(),
        Some(period) => frames.throttle_latest(period).boxed(),
    }
}
