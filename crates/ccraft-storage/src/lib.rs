//! Object storage for uploaded and produced media.
//!
//! This crate provides:
//! - [`ObjectStorage`] trait (upload by id, retrieval URL by id)
//! - Cloudflare R2 implementation with presigned retrieval URLs

pub mod error;
pub mod r2;
pub mod storage;

pub use error::{StorageError, StorageResult};
pub use r2::{R2Config, R2Storage};
pub use storage::{image_key, video_key, ObjectStorage, StoredObject};
