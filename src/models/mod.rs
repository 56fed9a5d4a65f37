//! Core data models for manga records and the streaming wire protocol.

mod events;
mod manga;

pub use events::{
    CorrelationId, Done, Emission, ErrorKind, ErrorPayload, Operation, PageError, Payload,
};
pub use manga::{
    sort_chapters_descending, ChapterDescriptor, ChapterId, ChapterInfo, ChapterPage, MangaDetail,
    MangaId, MangaLocator, MangaSummary, ReleaseInfo,
};
