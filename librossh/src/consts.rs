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

pub const BUF_SIZE: usize = 1024 * 16;

pub const STDIN_FD: i32 = 0;
pub const STDERR_FD: i32 = 2;

/// Base directory for all session directories on the remote host.
pub const SESSION_DIR_BASE: &str = "/tmp";

/// Prefix prepended to a terminal id to form a session directory name.
pub const SESSION_DIR_PREFIX: &str = "rossh.";

/// Name of the program directory the client keeps in the user's home
/// directory on the remote host, where the uploaded `rossh-server` binary
/// and orphan markers live.
pub const REMOTE_PROGRAM_DIR: &str = ".rossh";

/// Name of the uploaded remote binary within `REMOTE_PROGRAM_DIR`.
pub const REMOTE_SERVER_BIN: &str = "rossh-server";

/// Prefix for orphan marker files in the client's local program directory.
pub const ORPHAN_MARKER_PREFIX: &str = ".orphan.";

/// Maximum size, in bytes, of a single base64-encoded chunk written during
/// the install sequence. Kept small enough to survive terminal echo and
/// common shell line-length limits.
pub const INSTALL_CHUNK_SIZE: usize = 1023;
