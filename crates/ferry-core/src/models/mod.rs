pub mod file;
pub mod share;
pub mod upload;

pub use file::{CommitRecord, FileRecord, FileStatus, NewFile};
pub use share::Share;
pub use upload::{
    ExtendRetentionRequest, FileResponse, IngestResponse, PresignedUploadRequest,
    PresignedUploadResponse,
};
