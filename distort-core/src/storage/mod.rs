//! Local file collaborators
//!
//! Directory listing, digests, the distortion transform and chunked file
//! copy. Listing and digests shell out to the system tools.

pub mod copy;
pub mod digest;
pub mod distort;
pub mod listing;

pub use copy::{ChunkReader, ChunkWriter};
pub use digest::{digest_file, verify_file, Digest, Md5sumDigest, DIGEST_ERROR};
pub use distort::{Distorter, StrideDistorter};
pub use listing::{all_extensions, DirectoryLister, FindLister};
