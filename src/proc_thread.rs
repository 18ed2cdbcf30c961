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

//! A process group simulated by threads within one OS process.
//!
//! Each member runs on its own thread and owns its own copy of all data;
//! the only shared state is the collective machinery below. Aborting the
//! group (or a member panicking) wakes every blocked member and unwinds it.

use crate::proc::*;

use log::{error};
use parking_lot::{Condvar, Mutex};
use thiserror::{Error};

use std::any::{Any};
use std::collections::{HashMap, VecDeque};
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc};
use std::thread;

/// Abort code recorded when a member dies of an ordinary panic.
pub const PANIC_ABORT_CODE: i32 = 101;

/// Unwind payload carried by members of an aborted group.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GroupAbort {
  pub code: i32,
}

#[derive(Debug, Error)]
pub enum ThreadProcError {
  #[error("process group aborted with code {0}")]
  Aborted(i32),
  #[error("process group member panicked")]
  Panicked(Box<dyn Any + Send + 'static>),
}

struct GroupState {
  aborted:      Option<i32>,
  bar_count:    usize,
  bar_gen:      u64,
  bcast_slot:   Vec<u8>,
  // Keyed by (src, dst, tag).
  mailbox:      HashMap<(usize, usize, usize), VecDeque<i32>>,
}

struct GroupShared {
  nranks:   usize,
  state:    Mutex<GroupState>,
  cond:     Condvar,
}

impl GroupShared {
  fn poison(&self, code: i32) {
    let mut state = self.state.lock();
    if state.aborted.is_none() {
      state.aborted = Some(code);
    }
    self.cond.notify_all();
  }
}

fn check_abort(state: &GroupState) {
  if let Some(code) = state.aborted {
    panic::panic_any(GroupAbort{code});
  }
}

pub struct ThreadProcGroup {
  closed:   bool,
  rank_ctr: usize,
  shared:   Arc<GroupShared>,
}

impl ThreadProcGroup {
  pub fn new(num_ranks: usize) -> Self {
    assert!(num_ranks >= 1, "ThreadProcGroup: need at least one rank");
    ThreadProcGroup{
      closed:   false,
      rank_ctr: 0,
      shared:   Arc::new(GroupShared{
        nranks: num_ranks,
        state:  Mutex::new(GroupState{
          aborted:      None,
          bar_count:    0,
          bar_gen:      0,
          bcast_slot:   Vec::new(),
          mailbox:      HashMap::new(),
        }),
        cond:   Condvar::new(),
      }),
    }
  }

  /// Spawns `f` on every member and joins them all, returning the
  /// per-rank results in rank order.
  pub fn run<F, R>(num_ranks: usize, f: F) -> io::Result<Vec<Result<R, ThreadProcError>>>
  where F: Fn(ThreadProc) -> R + Send + Sync + 'static, R: Send + 'static {
    let f = Arc::new(f);
    let mut handles = Vec::with_capacity(num_ranks);
    for p in ThreadProcGroup::new(num_ranks) {
      let f = f.clone();
      handles.push(p.spawn(move |proc| (*f)(proc))?);
    }
    Ok(handles.into_iter().map(|h| h.join()).collect())
  }
}

impl Iterator for ThreadProcGroup {
  type Item = ThreadProc;

  fn next(&mut self) -> Option<Self::Item> {
    if self.closed {
      return None;
    }
    let rank = self.rank_ctr;
    self.rank_ctr += 1;
    if self.rank_ctr == self.shared.nranks {
      self.closed = true;
    }
    Some(ThreadProc{
      rank:     rank,
      shared:   self.shared.clone(),
    })
  }
}

pub struct ThreadProcJoinHandle<R> {
  handle:   thread::JoinHandle<R>,
}

impl<R> ThreadProcJoinHandle<R> {
  pub fn join(self) -> Result<R, ThreadProcError> {
    match self.handle.join() {
      Ok(r) => Ok(r),
      Err(payload) => match payload.downcast::<GroupAbort>() {
        Ok(abort) => Err(ThreadProcError::Aborted(abort.code)),
        Err(payload) => Err(ThreadProcError::Panicked(payload)),
      },
    }
  }
}

#[derive(Clone)]
pub struct ThreadProc {
  rank:     usize,
  shared:   Arc<GroupShared>,
}

impl ThreadProc {
  pub fn spawn<F, R>(self, f: F) -> io::Result<ThreadProcJoinHandle<R>>
  where F: FnOnce(ThreadProc) -> R + Send + 'static, R: Send + 'static {
    let shared = self.shared.clone();
    let handle = thread::Builder::new()
      .name(format!("distio-rank-{}", self.rank))
      .spawn(move || {
        match panic::catch_unwind(AssertUnwindSafe(|| f(self))) {
          Ok(r) => r,
          Err(payload) => {
            if !payload.is::<GroupAbort>() {
              shared.poison(PANIC_ABORT_CODE);
            }
            panic::resume_unwind(payload)
          }
        }
      })?;
    Ok(ThreadProcJoinHandle{handle})
  }
}

impl Proc for ThreadProc {
  fn rank(&self) -> usize {
    self.rank
  }

  fn num_ranks(&self) -> usize {
    self.shared.nranks
  }

  fn barrier(&self) {
    let mut state = self.shared.state.lock();
    check_abort(&state);
    let gen = state.bar_gen;
    state.bar_count += 1;
    if state.bar_count == self.shared.nranks {
      state.bar_count = 0;
      state.bar_gen += 1;
      self.shared.cond.notify_all();
      return;
    }
    while state.bar_gen == gen {
      self.shared.cond.wait(&mut state);
      check_abort(&state);
    }
  }

  fn broadcast(&self, buf: &mut [u8], root: usize) {
    assert!(root < self.shared.nranks, "ThreadProc: broadcast root {} out of range", root);
    if self.rank == root {
      let mut state = self.shared.state.lock();
      check_abort(&state);
      state.bcast_slot.clear();
      state.bcast_slot.extend_from_slice(buf);
    }
    self.barrier();
    if self.rank != root {
      let state = self.shared.state.lock();
      check_abort(&state);
      assert_eq!(state.bcast_slot.len(), buf.len(),
          "ThreadProc: broadcast length mismatch on rank {}", self.rank);
      buf.copy_from_slice(&state.bcast_slot);
    }
    // The slot is reused by the next broadcast.
    self.barrier();
  }

  fn send_token(&self, dst: usize, tag: usize, token: i32) {
    assert!(dst < self.shared.nranks, "ThreadProc: send to rank {} out of range", dst);
    let mut state = self.shared.state.lock();
    check_abort(&state);
    state.mailbox.entry((self.rank, dst, tag)).or_insert_with(VecDeque::new).push_back(token);
    self.shared.cond.notify_all();
  }

  fn recv_token(&self, src: usize, tag: usize) -> i32 {
    assert!(src < self.shared.nranks, "ThreadProc: recv from rank {} out of range", src);
    let key = (src, self.rank, tag);
    let mut state = self.shared.state.lock();
    loop {
      check_abort(&state);
      if let Some(token) = state.mailbox.get_mut(&key).and_then(|q| q.pop_front()) {
        return token;
      }
      self.shared.cond.wait(&mut state);
    }
  }

  fn abort(&self, code: i32) -> ! {
    error!("ThreadProc: rank {} aborting process group (code {})", self.rank, code);
    self.shared.poison(code);
    panic::panic_any(GroupAbort{code})
  }
}
