/*
Copyright 2018 Peter Jin

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

use crate::proc::*;

use std::fmt;
use std::io::{self, Write};

/// Which members print a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RankTarget {
  /// Every member, each line prefixed with its rank.
  All,
  /// Only this rank.
  Rank(usize),
  /// Rank `k % num_ranks`; prefixed once `k` wraps past the group size.
  RoundRobin(usize),
}

/// The text this member would print for `target`, or `None` if the message
/// is meant for another member.
pub fn rank_render<P: Proc + ?Sized>(proc: &P, target: RankTarget, args: fmt::Arguments) -> Option<String> {
  if !proc.is_distributed() {
    return Some(fmt::format(args));
  }
  let rank = proc.rank();
  let nranks = proc.num_ranks();
  match target {
    RankTarget::All => Some(format!("Rank={}, {}", rank, args)),
    RankTarget::Rank(r) if r == rank => Some(fmt::format(args)),
    RankTarget::Rank(_) => None,
    RankTarget::RoundRobin(k) if k % nranks == rank => {
      if k >= nranks {
        Some(format!("Rank={}, {}", rank, args))
      } else {
        Some(fmt::format(args))
      }
    }
    RankTarget::RoundRobin(_) => None,
  }
}

/// Prints to stdout on the targeted members and flushes.
pub fn rank_print<P: Proc + ?Sized>(proc: &P, target: RankTarget, args: fmt::Arguments) -> io::Result<()> {
  if let Some(text) = rank_render(proc, target, args) {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    out.write_all(text.as_bytes())?;
    out.flush()?;
  }
  Ok(())
}

#[macro_export]
macro_rules! rank_println {
  ($proc:expr, $target:expr, $($arg:tt)*) => {
    $crate::rank_log::rank_print($proc, $target, format_args!("{}\n", format_args!($($arg)*)))
  };
}

/// Hands out work items to members in turn.
#[derive(Clone, Copy, Debug, Default)]
pub struct WorkRotor {
  next: usize,
}

impl WorkRotor {
  pub fn new() -> WorkRotor {
    WorkRotor::default()
  }

  /// Returns true if the current item belongs to another member, and
  /// advances to the next item. A group of one never skips.
  pub fn skip<P: Proc + ?Sized>(&mut self, proc: &P) -> bool {
    if !proc.is_distributed() {
      return false;
    }
    let skip = self.next != proc.rank();
    self.next += 1;
    if self.next >= proc.num_ranks() {
      self.next = 0;
    }
    skip
  }
}
