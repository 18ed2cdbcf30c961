/*
Copyright 2017-2018 Peter Jin

Licensed under the Apache License, Version 2.0 (the "License");
you may not use this file except in compliance with the License.
You may obtain a copy of the License at

    http://www.apache.org/licenses/LICENSE-2.0

Unless required by applicable law or agreed to in writing, software
distributed under the License is distributed on an "AS IS" BASIS,
WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
See the License for the specific language governing permissions and
limitations under the License.
*/

use log::{warn};

use std::env;
use std::str::{FromStr};

pub const DEFAULT_BUFFER_SIZE: usize = 16 * 1024 * 1024;
pub const DEFAULT_LINE_MAX:    usize = 4096;

lazy_static! {
  static ref CONFIG: Config = Config::default();
}

/// The process-wide config, read once from the environment.
pub fn config() -> &'static Config {
  &CONFIG
}

#[derive(Clone, Debug)]
pub struct Config {
  /// Buffer capacity used by `BufferCap::Default`.
  pub buffer_size:  usize,
  /// Line length limit used by `DistFile::next_line`.
  pub line_max:     usize,
}

fn env_key<T: FromStr>(key: &str) -> Option<T> {
  env::var(key).ok()
    .and_then(|val| match val.parse() {
      Err(_) => { warn!("config: failed to parse key '{}'", key); None }
      Ok(x) => Some(x),
    })
}

impl Default for Config {
  fn default() -> Self {
    Config{
      buffer_size:
        env_key("DISTIO_CFG_BUFFER_SIZE")
          .unwrap_or(DEFAULT_BUFFER_SIZE),
      line_max:
        env_key("DISTIO_CFG_LINE_MAX")
          .filter(|&n: &usize| n >= 2)
          .unwrap_or(DEFAULT_LINE_MAX),
    }
  }
}
