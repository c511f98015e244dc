pub mod consumer;
pub mod error;
pub mod producer;

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Condvar, Mutex};

pub use consumer::Consumer;
pub use error::PipeError;
pub use producer::Producer;

/// Minimum chunk size pushed by [`spawn_reader`].
pub const CHUNK_SIZE: usize = 64 * 1024;

pub(crate) struct State {
    pub(crate) queue: VecDeque<bytes::Bytes>,
    pub(crate) queued_bytes: usize,
    pub(crate) capacity: usize,
    pub(crate) done: Option<Option<io::Error>>,
    pub(crate) consumer_gone: bool,
    pub(crate) received_bytes: u64,
}

pub(crate) struct Shared {
    pub(crate) state: Mutex<State>,
    // producer waits on space, consumer waits on data
    pub(crate) space: Condvar,
    pub(crate) data: Condvar,
}

/// Create a bounded single-producer/single-consumer byte pipe.
///
/// `capacity` bounds the number of queued bytes; a `push` beyond it blocks
/// until the consumer drains the queue, giving backpressure against a fast
/// source.
pub fn channel(capacity: usize) -> (Producer, Consumer) {
    let shared = Arc::new(Shared {
        state: Mutex::new(State {
            queue: VecDeque::new(),
            queued_bytes: 0,
            capacity,
            done: None,
            consumer_gone: false,
            received_bytes: 0,
        }),
        space: Condvar::new(),
        data: Condvar::new(),
    });
    (
        Producer::from_shared(shared.clone()),
        Consumer::from_shared(shared),
    )
}

/// Spawn a thread that feeds `reader` into the pipe in [`CHUNK_SIZE`] reads.
///
/// A zero-byte read completes the pipe; an I/O error completes it with that
/// error as the cause. If the consumer goes away the thread stops reading.
pub fn spawn_reader<R>(producer: Producer, reader: R) -> std::thread::JoinHandle<()>
where
    R: io::Read + Send + 'static,
{
    std::thread::spawn(move || copy_to_pipe(producer, reader))
}

fn copy_to_pipe<R: io::Read>(producer: Producer, mut reader: R) {
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => {
                producer.close();
                return;
            }
            Ok(n) => {
                if producer.push(bytes::Bytes::copy_from_slice(&buf[..n])).is_err() {
                    tracing::debug!("consumer dropped, stopping byte source");
                    return;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                producer.fail(e);
                return;
            }
        }
    }
}
