//! Server-Sent Events support for `GET /admin/logs?follow=true`: each new
//! log line becomes one `data: <line>\n\n` event, ending only when the
//! client disconnects (axum drops the stream on cancellation).

use std::{path::PathBuf, time::Duration};

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::StreamExt;

const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Wraps [`crate::log::rotating::tail_stream`] as an SSE response.
pub fn follow_process_logs(path: PathBuf) -> Sse<impl futures::Stream<Item = Result<Event, std::convert::Infallible>>> {
    let stream = crate::log::tail_stream(path, POLL_INTERVAL).map(|line| Ok(Event::default().data(line)));
    Sse::new(stream).keep_alive(KeepAlive::default())
}
