//  Copyright 2025 Shoal Project Authors
//
//  Licensed under the Apache License, Version 2.0 (the "License");
//  you may not use this file except in compliance with the License.
//  You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0
//
//  Unless required by applicable law or agreed to in writing, software
//  distributed under the License is distributed on an "AS IS" BASIS,
//  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//  See the License for the specific language governing permissions and
//  limitations under the License.

use thiserror::Error;

/// Error type of the sharded containers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("key already exists")]
    KeyExists,
    #[error("key not found")]
    KeyNotFound,
    #[error("index {index} out of range for length {len}")]
    OutOfRange { index: usize, len: usize },
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),
    #[error("container is disposed")]
    Disposed,
    #[error("unknown or mistyped secondary index: {0}")]
    InvalidIndex(String),
}

pub type Result<T> = std::result::Result<T, Error>;
