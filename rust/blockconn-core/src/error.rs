use thiserror::Error;

use crate::geometry::wkb::DecodeError;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("invalid geometry for {what}: {source}")]
    Decode {
        what: String,
        #[source]
        source: DecodeError,
    },
    #[error("required table {0} does not exist")]
    MissingTable(String),
    #[error("no {0} found; nothing to process")]
    EmptyInput(&'static str),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("{pending} source block(s) pending and {claimed} claimed; finish the build before this step")]
    SourcesOutstanding { pending: i64, claimed: i64 },
    #[error("{count} duplicate (source, target) pair(s), e.g. ({example_source}, {example_target}); a source was processed more than once")]
    DuplicatePairs { count: i64, example_source: String, example_target: String },
    #[error("source block {0} is not in the block table")]
    UnknownBlock(String),
    #[error("claim on source block {0} was lost before commit")]
    ClaimLost(String),
    #[error("graph has not been reclassified; run reclassification before building indexes")]
    NotReclassified,
    #[error("worker thread panicked")]
    WorkerPanicked,
}

pub type Result<T> = std::result::Result<T, Error>;
