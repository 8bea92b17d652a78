//! An abstraction over the filesystem.  The scan only ever stats files and
//! reads depfiles, so that is all the trait exposes.

use std::io;

/// MTime info gathered for a file.  This also models "file is absent".
/// It's not using an Option<> just because it makes the code using it easier
/// to follow.  Missing orders before any Stamp, so max() picks the newest
/// existing file.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum MTime {
    Missing,
    Stamp(u64),
}

pub trait FileSystem {
    /// stat() an on-disk path, producing its MTime.  A missing file is data,
    /// not an error.
    fn stat(&self, path: &str) -> io::Result<MTime>;
    fn read(&self, path: &str) -> io::Result<Vec<u8>>;
}

/// FileSystem that reads the real disk.
pub struct RealFileSystem;

impl FileSystem for RealFileSystem {
    fn stat(&self, path: &str) -> io::Result<MTime> {
        match std::fs::metadata(path) {
            Ok(meta) => Ok(MTime::Stamp(mtime_of(&meta))),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(MTime::Missing),
            Err(err) => Err(err),
        }
    }

    fn read(&self, path: &str) -> io::Result<Vec<u8>> {
        std::fs::read(path)
    }
}

#[cfg(unix)]
fn mtime_of(meta: &std::fs::Metadata) -> u64 {
    use std::os::unix::fs::MetadataExt;
    meta.mtime() as u64
}

#[cfg(not(unix))]
fn mtime_of(meta: &std::fs::Metadata) -> u64 {
    match meta.modified() {
        Ok(t) => t
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0),
        Err(_) => 0,
    }
}
