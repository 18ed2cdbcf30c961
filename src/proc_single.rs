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

use std::process;

pub struct SingleProcGroup {
  closed:   bool,
}

impl Default for SingleProcGroup {
  fn default() -> Self {
    SingleProcGroup{
      closed:   false,
    }
  }
}

impl Iterator for SingleProcGroup {
  type Item = SingleProc;

  fn next(&mut self) -> Option<Self::Item> {
    if self.closed {
      return None;
    }
    self.closed = true;
    Some(SingleProc)
  }
}

pub struct SingleProcJoinHandle<R> {
  result:   R,
}

impl<R> SingleProcJoinHandle<R> {
  pub fn join(self) -> R {
    self.result
  }
}

/// The only member of a group of size 1. Every collective is a no-op.
#[derive(Clone, Copy, Debug, Default)]
pub struct SingleProc;

impl SingleProc {
  pub fn spawn<F, R>(self, f: F) -> SingleProcJoinHandle<R> where F: FnOnce(SingleProc) -> R {
    SingleProcJoinHandle{result: f(self)}
  }
}

impl Proc for SingleProc {
  fn rank(&self) -> usize {
    0
  }

  fn num_ranks(&self) -> usize {
    1
  }

  fn barrier(&self) {
  }

  fn broadcast(&self, _buf: &mut [u8], root: usize) {
    assert_eq!(root, 0);
  }

  fn send_token(&self, dst: usize, _tag: usize, _token: i32) {
    panic!("bug: SingleProc: no peer rank {} to send to", dst);
  }

  fn recv_token(&self, src: usize, _tag: usize) -> i32 {
    panic!("bug: SingleProc: no peer rank {} to receive from", src);
  }

  fn abort(&self, code: i32) -> ! {
    process::exit(code)
  }
}
