//! Error types shared by the book, the matcher and the engines.
//!
//! A cancel that finds nothing is not an error; it is answered with a
//! `NotCancelled` response.

use crate::protocol::Guid;
use crate::rbtree::TreeViolation;
use crate::validation::ValidationError;
use thiserror::Error;

/// Order book failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BookError {
    #[error("order {0:#018x} is already resting")]
    DuplicateOrder(Guid),

    #[error("order book corrupted: {0}")]
    Corrupted(#[from] TreeViolation),

    #[error("order book inconsistent: {0}")]
    Inconsistent(String),
}

/// Matching engine failures.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("order rejected: {0}")]
    Rejected(#[from] ValidationError),

    #[error(transparent)]
    Book(#[from] BookError),

    #[error("engine channel disconnected")]
    Disconnected,

    #[error("failed to spawn engine worker: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("engine worker {0} panicked")]
    WorkerPanicked(usize),

    #[error("shutdown must be requested through PartitionedEngine::shutdown")]
    UnexpectedShutdown,
}
