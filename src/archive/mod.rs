//! Package archive extraction.
//!
//! Generator packages are published as gzip-compressed tarballs.

mod tar_gz;

pub use tar_gz::extract_tar_gz;
