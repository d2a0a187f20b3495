#![forbid(unsafe_code)]

pub mod blacklist;
pub mod config;
pub mod editor;
pub mod error;
pub mod history;
pub mod loader;
pub mod playlist;
pub mod pool;
pub mod probe;
pub mod resolver;
pub mod sources;

pub use blacklist::{Blacklist, BlacklistEntry};
pub use config::{ProbeConfig, ResolveSettings, DEFAULT_USER_AGENT};
pub use editor::{PlaylistEditor, RepairSummary};
pub use error::{EditorError, StoreError};
pub use history::{UndoManager, UndoState, DEFAULT_UNDO_DEPTH};
pub use loader::{read_local, HttpLoader, LoadError, PlaylistLoader, RetryPolicy};
pub use playlist::{Channel, Header, Playlist, SortKey, StatusCounts, UrlStatus};
pub use pool::{PoolSummary, WorkerPool};
pub use probe::{
    probe_batch, probe_stream, BatchSummary, HttpProber, ProbeOutcome, ProbeReport, ProbeState,
    Prober,
};
pub use resolver::{LinkResolver, MatchMode, Resolution};
pub use sources::{
    Candidate, LinkSource, LinkSourceManager, RefreshReport, SourceError, SourceKind,
    SourceSnapshot, Trust,
};
