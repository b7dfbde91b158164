//! Types that describe a conda package archive on disk or in a channel.

mod archive_identifier;

pub use archive_identifier::{ArchiveIdentifier, ArchiveType};
