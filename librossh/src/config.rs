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

//! Client configuration: an optional TOML file overlaid on defaults. Kept
//! deliberately small -- this system's Non-goals exclude the kind of shell
//! environment customization a config file would otherwise grow to cover.

use std::{fs, path::Path};

use anyhow::Context;
use serde_derive::Deserialize;
use tracing::{info, instrument};

/// Client-tunable settings, loadable from `~/.rossh/config.toml` or an
/// explicit `--config-file`.
#[derive(Debug, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Remote directory (relative to the user's home) the client installs
    /// `rossh-server` into and scans for orphan markers.
    pub remote_install_dir: Option<String>,
    /// Default log file path, overridable by `--log-file`.
    pub log_file: Option<String>,
    /// Verbosity floor, in the same 0/1/2+ scale as repeated `-v` flags.
    pub verbosity: u8,
    /// Whether to reconnect automatically instead of prompting the user
    /// after a dropped link.
    pub auto_reconnect: bool,
}

/// Read a config file if `path` is given or the default location exists;
/// otherwise return defaults. A missing file is never an error -- only a
/// malformed one is.
#[instrument(skip_all)]
pub fn read_config(path: Option<&Path>, default_path: &Path) -> anyhow::Result<Config> {
    let candidate = match path {
        Some(p) => p,
        None => default_path,
    };

    let contents = match fs::read_to_string(candidate) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Config::default()),
        Err(e) => return Err(e).with_context(|| format!("reading config file {:?}", candidate)),
    };

    info!("parsing config file {:?}", candidate);
    toml::from_str(&contents).with_context(|| format!("parsing config file {:?}", candidate))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let cfg = read_config(None, Path::new("/nonexistent/rossh-config-test.toml")).unwrap();
        assert_eq!(cfg, Config::default());
    }

    #[test]
    fn partial_file_overlays_defaults() -> anyhow::Result<()> {
        let dir = std::env::temp_dir().join(format!("rossh-config-test-{}", std::process::id()));
        fs::create_dir_all(&dir)?;
        let path = dir.join("config.toml");
        fs::write(&path, "verbosity = 2\nauto_reconnect = true\n")?;

        let cfg = read_config(Some(&path), Path::new("/unused"))?;
        assert_eq!(cfg.verbosity, 2);
        assert!(cfg.auto_reconnect);
        assert_eq!(cfg.remote_install_dir, None);

        fs::remove_dir_all(&dir)?;
        Ok(())
    }
}
