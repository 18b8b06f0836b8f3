// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Per service pid files, doubling as a cross-process exclusive lock
//!
//! The lock is an advisory, non-blocking `flock(2)` on the open file description. A second
//! acquisition, from another process or from another open of the same path, sees
//! [`Acquired::Unavailable`] until the holder releases or drops its [`MarkerLock`].

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use tracing::debug;

use crate::Error;

/// Stored in a marker file until a process has been started for it.
pub const UNSTARTED: &str = "-1";

/// The decoded contents of a marker file
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MarkerValue {
    Unstarted,
    Pid(u32),
}

impl MarkerValue {
    pub fn parse(contents: &str) -> Result<Self, Error> {
        let contents = contents.trim();
        if contents.is_empty() || contents == UNSTARTED {
            return Ok(MarkerValue::Unstarted);
        }

        contents
            .parse::<u32>()
            .map(MarkerValue::Pid)
            .map_err(|_| Error::from(format!("marker holds neither a pid nor {}: {:?}", UNSTARTED, contents)))
    }

    pub fn pid(self) -> Option<u32> {
        match self {
            MarkerValue::Unstarted => None,
            MarkerValue::Pid(pid) => Some(pid),
        }
    }
}

impl fmt::Display for MarkerValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarkerValue::Unstarted => f.write_str(UNSTARTED),
            MarkerValue::Pid(pid) => write!(f, "{}", pid),
        }
    }
}

/// Result of a non-blocking acquisition
#[derive(Debug)]
pub enum Acquired {
    Locked(MarkerLock),
    /// Someone else holds the lock, this is not an error
    Unavailable,
}

/// A marker file on disk, not yet opened.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MarkerFile {
    path: PathBuf,
}

impl MarkerFile {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Overwrites the file with the unstarted sentinel, without taking the lock.
    pub fn reset(&self) -> Result<(), Error> {
        fs::write(&self.path, UNSTARTED)?;
        Ok(())
    }

    /// Opens (creating if needed) and tries to lock the file exclusively without blocking.
    ///
    /// Contention is reported as `Ok(Acquired::Unavailable)`, every other failure is an `Err`.
    pub fn acquire(&self) -> Result<Acquired, Error> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)?;

        match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(file) => {
                debug!(path = %self.path.display(), "locked marker file");
                Ok(Acquired::Locked(MarkerLock {
                    path: self.path.clone(),
                    file,
                }))
            }
            Err((_, Errno::EWOULDBLOCK)) | Err((_, Errno::EACCES)) => Ok(Acquired::Unavailable),
            Err((_, errno)) => Err(errno.into()),
        }
    }
}

/// An open, exclusively locked marker file
///
/// The lock is released by [`MarkerLock::release`] or when this is dropped, whichever comes first.
pub struct MarkerLock {
    path: PathBuf,
    file: Flock<File>,
}

impl MarkerLock {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the identifier currently recorded in the file
    pub fn read(&mut self) -> Result<MarkerValue, Error> {
        let mut contents = String::new();
        self.file.seek(SeekFrom::Start(0))?;
        self.file.read_to_string(&mut contents)?;

        MarkerValue::parse(&contents)
    }

    /// Truncates the file and records `value` as its only content
    pub fn write(&mut self, value: MarkerValue) -> Result<(), Error> {
        self.file.set_len(0)?;
        self.file.seek(SeekFrom::Start(0))?;
        write!(self.file, "{}", value)?;
        self.file.flush()?;

        Ok(())
    }

    pub fn release(self) -> Result<(), Error> {
        let MarkerLock { path, file } = self;

        file.unlock().map_err(|(_, errno)| errno)?;
        debug!(path = %path.display(), "unlocked marker file");

        Ok(())
    }
}

impl fmt::Debug for MarkerLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MarkerLock").field("path", &self.path).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn locked(acquired: Acquired) -> MarkerLock {
        match acquired {
            Acquired::Locked(lock) => lock,
            Acquired::Unavailable => panic!("expected the lock to be free"),
        }
    }

    #[test]
    fn test_parse() {
        assert_eq!(MarkerValue::parse("-1").unwrap(), MarkerValue::Unstarted);
        assert_eq!(MarkerValue::parse("").unwrap(), MarkerValue::Unstarted);
        assert_eq!(MarkerValue::parse("4242\n").unwrap(), MarkerValue::Pid(4242));
        assert!(MarkerValue::parse("etcd").is_err());
        assert_eq!(MarkerValue::Pid(7).to_string(), "7");
    }

    #[test]
    fn test_second_acquire_is_unavailable_until_release() {
        let dir = tempfile::tempdir().unwrap();
        let marker = MarkerFile::new(dir.path().join("etcd.pid"));

        let first = locked(marker.acquire().unwrap());
        assert!(matches!(marker.acquire().unwrap(), Acquired::Unavailable));

        first.release().unwrap();
        let second = locked(marker.acquire().unwrap());
        drop(second);

        // dropping releases as well
        assert!(matches!(marker.acquire().unwrap(), Acquired::Locked(_)));
    }

    #[test]
    fn test_write_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let marker = MarkerFile::new(dir.path().join("svc.pid"));
        marker.reset().unwrap();

        let mut lock = locked(marker.acquire().unwrap());
        assert_eq!(lock.read().unwrap(), MarkerValue::Unstarted);

        lock.write(MarkerValue::Pid(123_456)).unwrap();
        lock.write(MarkerValue::Pid(7)).unwrap();
        assert_eq!(lock.read().unwrap(), MarkerValue::Pid(7));
        lock.release().unwrap();

        assert_eq!(fs::read_to_string(marker.path()).unwrap(), "7");
    }

    #[test]
    fn test_missing_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let marker = MarkerFile::new(dir.path().join("missing").join("svc.pid"));

        assert!(marker.acquire().is_err());
    }
}
