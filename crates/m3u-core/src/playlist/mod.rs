pub mod channel;
pub mod codec;
pub mod header;
pub mod store;

pub use channel::{
    Channel, HeaderList, ReplacementRecord, UrlStatus, MAX_REPLACEMENT_HISTORY, UNGROUPED,
};
pub use header::Header;
pub use store::{Playlist, ProbeTarget, SortKey, StatusCounts};
