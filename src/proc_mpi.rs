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

use crate::proc::*;

use log::{debug};
use mpi::environment::{Universe};
use mpi::topology::{SimpleCommunicator};
use mpi::traits::*;

/// The MPI world communicator as a process group. Dropping the group
/// finalizes MPI, so it must outlive every `DistProc` taken from it.
pub struct DistProcGroup {
  closed:   bool,
  // `None` if MPI was already initialized elsewhere.
  _universe: Option<Universe>,
}

impl Default for DistProcGroup {
  fn default() -> Self {
    let universe = mpi::initialize();
    if universe.is_none() {
      debug!("DistProcGroup: MPI already initialized");
    }
    DistProcGroup{
      closed:   false,
      _universe: universe,
    }
  }
}

impl Iterator for DistProcGroup {
  type Item = DistProcSpawner;

  fn next(&mut self) -> Option<Self::Item> {
    if self.closed {
      return None;
    }
    // One member per OS process.
    self.closed = true;
    let world = SimpleCommunicator::world();
    let proc = DistProc{
      srank:    world.rank() as usize,
      nsranks:  world.size() as usize,
    };
    Some(DistProcSpawner{proc})
  }
}

pub struct DistProcSpawner {
  proc: DistProc,
}

impl DistProcSpawner {
  pub fn spawn<F, R>(self, f: F) -> R where F: FnOnce(DistProc) -> R {
    f(self.proc)
  }
}

#[derive(Clone, Copy, Debug)]
pub struct DistProc {
  srank:    usize,
  nsranks:  usize,
}

impl Proc for DistProc {
  fn rank(&self) -> usize {
    self.srank
  }

  fn num_ranks(&self) -> usize {
    self.nsranks
  }

  fn barrier(&self) {
    SimpleCommunicator::world().barrier();
  }

  fn broadcast(&self, buf: &mut [u8], root: usize) {
    let world = SimpleCommunicator::world();
    world.process_at_rank(root as i32).broadcast_into(buf);
  }

  fn send_token(&self, dst: usize, tag: usize, token: i32) {
    let world = SimpleCommunicator::world();
    world.process_at_rank(dst as i32).send_with_tag(&token, tag as i32);
  }

  fn recv_token(&self, src: usize, tag: usize) -> i32 {
    let world = SimpleCommunicator::world();
    let (token, _status) = world.process_at_rank(src as i32).receive_with_tag::<i32>(tag as i32);
    token
  }

  fn abort(&self, code: i32) -> ! {
    SimpleCommunicator::world().abort(code)
  }
}
