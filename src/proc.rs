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

/// The rank that performs real file I/O on behalf of the group.
pub const ORIGIN_RANK: usize = 0;

/// A member of a process group, together with the collective primitives
/// the group supports.
///
/// Every collective call blocks until all members (or, for the
/// point-to-point calls, the matching peer) have made the same call; there
/// is no timeout.
pub trait Proc {
  fn rank(&self) -> usize;
  fn num_ranks(&self) -> usize;

  /// Returns once every member has called `barrier`.
  fn barrier(&self);

  /// After this returns, every member's `buf` holds the bytes that `root`
  /// passed in. All members must pass the same length.
  fn broadcast(&self, buf: &mut [u8], root: usize);

  fn send_token(&self, dst: usize, tag: usize, token: i32);
  fn recv_token(&self, src: usize, tag: usize) -> i32;

  /// Terminates every member of the group.
  fn abort(&self, code: i32) -> !;

  fn is_origin(&self) -> bool {
    self.rank() == ORIGIN_RANK
  }

  /// True when there is more than one member, i.e. when collectives
  /// actually communicate.
  fn is_distributed(&self) -> bool {
    self.num_ranks() > 1
  }
}

impl<'a, P: Proc + ?Sized> Proc for &'a P {
  fn rank(&self) -> usize {
    (**self).rank()
  }

  fn num_ranks(&self) -> usize {
    (**self).num_ranks()
  }

  fn barrier(&self) {
    (**self).barrier()
  }

  fn broadcast(&self, buf: &mut [u8], root: usize) {
    (**self).broadcast(buf, root)
  }

  fn send_token(&self, dst: usize, tag: usize, token: i32) {
    (**self).send_token(dst, tag, token)
  }

  fn recv_token(&self, src: usize, tag: usize) -> i32 {
    (**self).recv_token(src, tag)
  }

  fn abort(&self, code: i32) -> ! {
    (**self).abort(code)
  }
}
