//! Single-shot model download with sampled progress reporting.

pub mod coordinator;
pub mod hub;
pub mod sampler;

pub use coordinator::{ArtifactFetcher, DownloadCoordinator, DownloadTask};
pub use hub::HubFetcher;
pub use sampler::{dir_size, ProgressSample, ProgressSampler};
