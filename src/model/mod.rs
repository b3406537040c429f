//! Model module - Playback state and data types
//!
//! - `track`: Canonical track, provider tags and uri helpers
//! - `queue`: Local playback queue for backends without a native queue
//! - `ai_queue`: AI queue session state
//! - `keep_alive`: Device types and keep-alive monitor state
//! - `mood`: Session-only mood context

mod track;
mod queue;
mod ai_queue;
mod keep_alive;
mod mood;

pub use track::{
    Album, AlbumImage, Artist, PlaybackState, ProviderTag, Track,
    parse_uri, provider_from_uri,
};

pub use queue::PlaybackQueue;

pub use ai_queue::{AiQueueState, QueuedTrack};

pub use keep_alive::{
    DeviceInfo, DeviceKind, KeepAliveState, choose_recovery_target,
};

pub use mood::MoodContext;
