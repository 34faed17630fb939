//! File storage drivers and the upload pipeline.

mod backend;
mod extract;
mod images;
mod upload;

pub use backend::{FileBackend, LocalFileBackend};
pub use upload::UploadRequest;

pub(crate) use images::looks_like_svg;
