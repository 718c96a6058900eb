use mongodb::bson;
use thiserror::Error;

/// Every failure is fatal to the run; nothing here is retried.
#[derive(Debug, Error)]
pub enum Error {
    #[error("unsupported shard key value type {kind:?} for field '{field}'")]
    UnsupportedType {
        field: String,
        kind: bson::spec::ElementType,
    },
    #[error("unsupported shard key value for field '{field}': {reason}")]
    UnsupportedValue { field: String, reason: String },
    #[error("unsupported shard key pattern {0}")]
    UnsupportedPattern(String),
    #[error("no docs found in collection {0}")]
    EmptyCollection(String),
    #[error("no chunks found for collection {0}")]
    NoChunksFound(String),
    #[error("{0} is not a sharded collection")]
    NotSharded(String),
    #[error("not mongos, please run against mongos processes only")]
    NotMongos,
    #[error("expected {expected} result document(s), received {actual}")]
    UnexpectedCardinality { expected: usize, actual: usize },
    #[error("malformed server reply: {0}")]
    Reply(String),
    #[error("malformed server reply: {0}")]
    Access(#[from] bson::document::ValueAccessError),
    #[error(transparent)]
    Mongo(#[from] mongodb::error::Error),
    #[error(transparent)]
    Encode(#[from] bson::ser::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("report writer stopped before all ranges were written")]
    ReporterClosed,
    #[error("report writer failed: {0}")]
    Writer(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, Error>;
