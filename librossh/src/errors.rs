// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Small marker error types, downcast at the call site that needs to branch
//! on a specific failure rather than just report it.

use std::fmt;

/// Returned when an endpoint loses a pre-emption race: a newer endpoint's
/// interrupt arrived and this one is giving up its slot. Not a "real" error
/// in the usual sense -- the daemon keeps running -- but distinct enough
/// from ordinary I/O failure that callers want to match on it specifically.
#[derive(Debug)]
pub struct PreemptedError;

impl fmt::Display for PreemptedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "endpoint was pre-empted by a newer connection")
    }
}

impl std::error::Error for PreemptedError {}

/// Returned when the remote and local protocol versions are incompatible in
/// the "client is too old" direction -- fatal, no retry.
#[derive(Debug)]
pub struct ClientTooOldError;

impl fmt::Display for ClientTooOldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client's protocol version is too old for this server")
    }
}

impl std::error::Error for ClientTooOldError {}
