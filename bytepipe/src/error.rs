use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipeError {
    #[error("pipe closed")]
    Closed,

    #[error("byte source failed: {0}")]
    Source(#[from] std::io::Error),
}
