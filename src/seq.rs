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

//! Runs a region once per member, one member at a time, in rank order.

use crate::proc::*;

use log::{error};

use std::thread;

/// Waits for the handoff token from rank `r - 1`. Rank 0 does not wait.
pub fn seq_begin<P: Proc + ?Sized>(proc: &P) {
  if !proc.is_distributed() {
    return;
  }
  let rank = proc.rank();
  if rank > 0 {
    let token = proc.recv_token(rank - 1, rank - 1);
    if token != (rank - 1) as i32 {
      error!("seq_begin: rank {} received token {}", rank, token);
    }
  }
}

/// Passes the token to rank `r + 1`, then waits until every member has
/// left its section.
pub fn seq_end<P: Proc + ?Sized>(proc: &P) {
  if !proc.is_distributed() {
    return;
  }
  let rank = proc.rank();
  if rank + 1 < proc.num_ranks() {
    proc.send_token(rank + 1, rank, rank as i32);
  }
  proc.barrier();
}

/// Calls `seq_end` when dropped, unless the member is unwinding.
pub struct SeqGuard<'a, P: Proc + ?Sized> {
  proc: &'a P,
}

impl<'a, P: Proc + ?Sized> SeqGuard<'a, P> {
  pub fn new(proc: &'a P) -> SeqGuard<'a, P> {
    seq_begin(proc);
    SeqGuard{proc}
  }
}

impl<'a, P: Proc + ?Sized> Drop for SeqGuard<'a, P> {
  fn drop(&mut self) {
    if thread::panicking() {
      return;
    }
    seq_end(self.proc);
  }
}

pub fn sequential<P: Proc + ?Sized, F: FnOnce() -> R, R>(proc: &P, f: F) -> R {
  let _guard = SeqGuard::new(proc);
  f()
}
