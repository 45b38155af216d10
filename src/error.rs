// Anaximander: Planning and Simulating Traceroute-Based Probing Campaigns
// Copyright (C) 2024-2025 The Anaximander developers
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//! Crate-wide error type.

use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the RIB parsing, strategy and simulation phases.
///
/// Fatal messages carry a `[context]` prefix together with the offending
/// file so that a failing phase can be pinpointed from the logs.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("[{context}]: {source}: {path:?}")]
    Io {
        context: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("[{context}]: cannot parse {what}: {line}")]
    Parse {
        context: &'static str,
        what: &'static str,
        line: String,
    },
    #[error("[{context}]: subprocess `{command}` failed: {message}")]
    Subprocess {
        context: &'static str,
        command: String,
        message: String,
    },
    #[error("[{context}]: {message}")]
    MissingData {
        context: &'static str,
        message: String,
    },
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl Error {
    pub fn io(context: &'static str, path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        Self::Io {
            context,
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn missing(context: &'static str, message: impl Into<String>) -> Self {
        Self::MissingData {
            context,
            message: message.into(),
        }
    }
}
