use std::sync::Arc;

use bytes::Bytes;

use crate::{PipeError, Shared};

/// Consumer end of the byte pipe.
pub struct Consumer {
    shared: Arc<Shared>,
}

impl Consumer {
    pub(crate) fn from_shared(shared: Arc<Shared>) -> Self {
        Consumer { shared }
    }

    /// Receive the next chunk, blocking until one is available.
    ///
    /// Returns `Ok(None)` when the producer completed cleanly; the producer's
    /// failure cause is returned once as [`PipeError::Source`].
    pub fn recv(&mut self) -> Result<Option<Bytes>, PipeError> {
        let mut state = self.shared.state.lock().unwrap();
        loop {
            if let Some(chunk) = state.queue.pop_front() {
                state.queued_bytes -= chunk.len();
                state.received_bytes += chunk.len() as u64;
                self.shared.space.notify_one();
                return Ok(Some(chunk));
            }
            match state.done.as_mut() {
                Some(cause) => {
                    return match cause.take() {
                        Some(e) => Err(PipeError::Source(e)),
                        None => Ok(None),
                    };
                }
                None => state = self.shared.data.wait(state).unwrap(),
            }
        }
    }

    /// Total bytes handed to the consumer so far, for progress reporting.
    pub fn bytes_received(&self) -> u64 {
        self.shared.state.lock().unwrap().received_bytes
    }
}

impl Drop for Consumer {
    fn drop(&mut self) {
        let mut state = self.shared.state.lock().unwrap();
        state.consumer_gone = true;
        self.shared.space.notify_one();
    }
}
