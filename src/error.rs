// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::io;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ErrorKind {
    #[error("io error: {0}")]
    IoError(#[from] io::Error),
    #[error("nix error: {0}")]
    NixError(#[from] nix::Error),
    #[error("configuration error: {0}")]
    ConfigError(#[from] figment::Error),
    #[error("task failed: {0}")]
    JoinError(#[from] tokio::task::JoinError),
    #[error("an error occured: {0}")]
    ErrorMsg(String),
    #[error("an error occured: {0}")]
    ErrorStr(&'static str),
}

#[derive(Error, Debug)]
#[error(transparent)]
pub struct Error(Box<ErrorKind>);

impl Error {
    fn from_kind(kind: ErrorKind) -> Self {
        Self(Box::new(kind))
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.0
    }
}

impl<E> From<E> for Error
where
    E: Into<ErrorKind>,
{
    fn from(err: E) -> Self {
        Self::from_kind(err.into())
    }
}

impl From<&'static str> for Error {
    fn from(err: &'static str) -> Self {
        Self::from_kind(ErrorKind::ErrorStr(err))
    }
}

impl From<String> for Error {
    fn from(err: String) -> Self {
        Self::from_kind(ErrorKind::ErrorMsg(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_keep_their_text() {
        let err = Error::from("no command configured");
        assert!(matches!(err.kind(), ErrorKind::ErrorStr(_)));
        assert_eq!(err.to_string(), "an error occured: no command configured");

        let err = Error::from(format!("service {} is duplicated", "etcd"));
        assert!(matches!(err.kind(), ErrorKind::ErrorMsg(_)));
    }

    #[test]
    fn test_errno_converts() {
        let err = Error::from(nix::errno::Errno::EAGAIN);
        assert!(matches!(err.kind(), ErrorKind::NixError(nix::errno::Errno::EAGAIN)));
    }
}
