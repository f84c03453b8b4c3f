use crate::ThreadLevel;
use thiserror::Error;

/// Fatal error classes of a benchmark run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Wrong peer count, missing thread support or unusable parameters.
    Configuration,
    /// Buffer allocation or window registration failed.
    Resource,
    /// A put, flush or epoch operation failed mid-run.
    DataPath,
}

#[derive(Error, Debug)]
pub enum BenchError {
    #[error("run with exactly two processes, got {0}")]
    PeerCount(u32),

    #[error("thread multiple support needed, substrate provides {0:?}")]
    ThreadSupport(ThreadLevel),

    #[error("invalid parameters: {0}")]
    InvalidParams(String),

    #[error("substrate already initialized in this process")]
    AlreadyInitialized,

    #[error("failed to allocate {size} bytes aligned to {align}")]
    Alloc { size: usize, align: usize },

    #[error("{op} failed with code {code}")]
    Substrate { op: &'static str, code: i32 },

    #[error("put of {len} bytes at displacement {disp} exceeds target region of {region} bytes")]
    OutOfBounds {
        disp: usize,
        len: usize,
        region: usize,
    },

    #[error("{0} issued outside an access epoch")]
    NoEpoch(&'static str),

    #[error("run aborted with code {0}")]
    Aborted(i32),

    #[error("elapsed time for thread {0} recorded twice")]
    DuplicateSample(usize),

    #[error("no elapsed time recorded for thread {0}")]
    MissingSample(usize),

    #[error("no elapsed-time slot for thread {0}")]
    UnknownThread(usize),

    #[error("worker thread {0} panicked")]
    WorkerPanicked(usize),

    #[error("failed to spawn worker thread {tid}: {source}")]
    ThreadSpawn {
        tid: usize,
        #[source]
        source: std::io::Error,
    },
}

impl BenchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BenchError::PeerCount(_)
            | BenchError::ThreadSupport(_)
            | BenchError::InvalidParams(_)
            | BenchError::AlreadyInitialized => ErrorKind::Configuration,
            BenchError::Alloc { .. } | BenchError::ThreadSpawn { .. } => ErrorKind::Resource,
            BenchError::Substrate { op, .. } => match *op {
                "win_create" | "win_free" | "init" => ErrorKind::Resource,
                _ => ErrorKind::DataPath,
            },
            BenchError::OutOfBounds { .. }
            | BenchError::NoEpoch(_)
            | BenchError::Aborted(_)
            | BenchError::DuplicateSample(_)
            | BenchError::MissingSample(_)
            | BenchError::UnknownThread(_)
            | BenchError::WorkerPanicked(_) => ErrorKind::DataPath,
        }
    }

    /// Code handed to the substrate's abort.
    pub fn exit_code(&self) -> i32 {
        match self.kind() {
            ErrorKind::Configuration => 1,
            ErrorKind::Resource => 2,
            ErrorKind::DataPath => 3,
        }
    }
}

pub type Result<T> = std::result::Result<T, BenchError>;
