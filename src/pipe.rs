// Copyright 2019 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::fmt::Debug;
use std::marker::PhantomData;
use std::os::unix::io::{AsRawFd, OwnedFd, RawFd};
use std::process::Stdio;

use nix::fcntl::OFlag;
use nix::unistd::pipe2;
use tokio::net::unix::pipe::Receiver;
use tracing::debug;

use crate::Error;

#[derive(Clone, Copy, Debug)]
pub struct Read;
#[derive(Clone, Copy, Debug)]
pub struct Write;

// A marker trait to designate the end of the pipe this represents
pub trait End: Clone + Copy + Debug {}

impl End for Read {}
impl End for Write {}

/// One end of an anonymous pipe, closed on drop
#[derive(Debug)]
pub struct PipeEnd<E: End> {
    fd: OwnedFd,
    ghost: PhantomData<E>,
}

impl<E: End> PipeEnd<E> {
    fn from_owned_fd(fd: OwnedFd) -> Self {
        Self {
            fd,
            ghost: PhantomData,
        }
    }
}

impl<E: End> AsRawFd for PipeEnd<E> {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl PipeEnd<Write> {
    /// A duplicate of this end suitable for a child's stdout or stderr
    ///
    /// Every duplicate must be closed, along with this end, before the reader sees EOF.
    pub fn stdio(&self) -> Result<Stdio, Error> {
        Ok(Stdio::from(self.fd.try_clone()?))
    }
}

impl PipeEnd<Read> {
    /// Registers the read end with the tokio reactor, this switches it to non-blocking mode.
    pub fn into_async(self) -> Result<Receiver, Error> {
        Ok(Receiver::from_owned_fd(self.fd)?)
    }
}

pub struct Pipe {
    read: PipeEnd<Read>,
    write: PipeEnd<Write>,
}

impl Pipe {
    /// Creates a new pipe, if possible,
    ///
    /// Both ends are close-on-exec, a child only ever sees the duplicates it is handed as stdio.
    /// It's expected that this is created before spawning, and that the parent drops its write end
    ///   once the child holds the duplicates.
    pub fn new() -> nix::Result<Self> {
        let (read, write) = pipe2(OFlag::O_CLOEXEC)?;
        debug!(
            "created pipe, read: {} write: {}",
            read.as_raw_fd(),
            write.as_raw_fd()
        );

        Ok(Self {
            read: PipeEnd::from_owned_fd(read),
            write: PipeEnd::from_owned_fd(write),
        })
    }

    pub fn split(self) -> (PipeEnd<Read>, PipeEnd<Write>) {
        (self.read, self.write)
    }
}
