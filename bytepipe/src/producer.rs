use std::io;
use std::sync::Arc;

use bytes::Bytes;

use crate::{PipeError, Shared};

/// Producer end of the byte pipe.
pub struct Producer {
    shared: Arc<Shared>,
}

impl Producer {
    pub(crate) fn from_shared(shared: Arc<Shared>) -> Self {
        Producer { shared }
    }

    /// Queue a chunk, blocking while the pipe is at capacity.
    ///
    /// Fails with [`PipeError::Closed`] once the consumer is gone.
    pub fn push(&self, chunk: Bytes) -> Result<(), PipeError> {
        if chunk.is_empty() {
            return Ok(());
        }
        let mut state = self.shared.state.lock().unwrap();
        while state.queued_bytes >= state.capacity && !state.consumer_gone {
            state = self.shared.space.wait(state).unwrap();
        }
        if state.consumer_gone || state.done.is_some() {
            return Err(PipeError::Closed);
        }
        state.queued_bytes += chunk.len();
        state.queue.push_back(chunk);
        self.shared.data.notify_one();
        Ok(())
    }

    /// Complete the pipe: the source yielded no more bytes.
    pub fn close(self) {
        self.complete(None);
    }

    /// Complete the pipe with an error cause.
    pub fn fail(self, cause: io::Error) {
        self.complete(Some(cause));
    }

    fn complete(&self, cause: Option<io::Error>) {
        let mut state = self.shared.state.lock().unwrap();
        if state.done.is_none() {
            state.done = Some(cause);
        }
        self.shared.data.notify_one();
    }
}

impl Drop for Producer {
    fn drop(&mut self) {
        // an unclosed producer counts as clean completion
        self.complete(None);
    }
}
