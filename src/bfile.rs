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

//! A file read by one member of a process group and replicated to the
//! rest through broadcasts.
//!
//! Only the origin rank touches the filesystem. Every other member keeps a
//! copy of the most recently broadcast chunk and a private cursor into it.
//! All members must issue the same sequence of calls with the same sizes;
//! nothing here detects a member that strays from the sequence.

use crate::config::*;
use crate::proc::*;

use log::{debug, error, warn};
use thiserror::{Error};

use std::cmp::{min};
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// Exit code passed to `Proc::abort` when a record cannot fit the buffer.
pub const ABORT_BUFFER_TOO_SMALL: i32 = 1;

const REFILL_HEADER_LEN: usize = 9;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferCap {
  /// `Config::buffer_size`.
  Default,
  /// Every member opens the file itself; nothing is broadcast.
  Disabled,
  Bytes(usize),
}

impl BufferCap {
  pub fn resolve(self) -> usize {
    match self {
      BufferCap::Default => config().buffer_size,
      BufferCap::Disabled => 0,
      BufferCap::Bytes(n) => n,
    }
  }
}

impl From<usize> for BufferCap {
  fn from(n: usize) -> Self {
    match n {
      0 => BufferCap::Disabled,
      n => BufferCap::Bytes(n),
    }
  }
}

#[derive(Debug, Error)]
pub enum OpenError {
  #[error("failed to open {}: {}", .path.display(), .source)]
  Local{path: PathBuf, #[source] source: io::Error},
  #[error("origin rank {} failed to open {}", .origin, .path.display())]
  Origin{path: PathBuf, origin: usize},
}

/// Whether the underlying file may still produce bytes. Converged across
/// members by the refill broadcast.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ReadState {
  More = 0,
  End = 1,
  /// The origin hit an I/O error; no more bytes will arrive.
  Failed = 2,
}

impl ReadState {
  fn from_u8(x: u8) -> ReadState {
    match x {
      0 => ReadState::More,
      1 => ReadState::End,
      _ => ReadState::Failed,
    }
  }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LineRead {
  /// A complete line, terminator included unless it was the last line of
  /// the file.
  Line,
  /// The length limit was reached before a terminator; the rest of the
  /// line is returned by the next call.
  Truncated,
  End,
}

fn read_full<R: Read>(r: &mut R, buf: &mut [u8]) -> (usize, Option<io::Error>) {
  let mut n = 0;
  while n < buf.len() {
    match r.read(&mut buf[n .. ]) {
      Ok(0) => break,
      Ok(k) => n += k,
      Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
      Err(e) => return (n, Some(e)),
    }
  }
  (n, None)
}

struct LocalFile {
  reader:   BufReader<File>,
  state:    ReadState,
}

impl LocalFile {
  fn read_elems(&mut self, path: &Path, dst: &mut [u8], elem_size: usize) -> usize {
    let (n, err) = read_full(&mut self.reader, dst);
    if let Some(e) = err {
      warn!("DistFile: {}: read failed: {}", path.display(), e);
      self.state = ReadState::Failed;
    } else if n < dst.len() {
      self.state = ReadState::End;
    }
    n / elem_size
  }

  fn read_line(&mut self, path: &Path, limit: usize, line: &mut Vec<u8>) -> LineRead {
    let start = line.len();
    let res = (&mut self.reader).take(limit as u64).read_until(b'\n', line);
    match res {
      Ok(0) => {
        self.state = ReadState::End;
        LineRead::End
      }
      Ok(n) => {
        if line.last() == Some(&b'\n') {
          return LineRead::Line;
        }
        if n < limit {
          self.state = ReadState::End;
          return LineRead::Line;
        }
        match self.reader.fill_buf() {
          Ok(rest) if rest.is_empty() => {
            self.state = ReadState::End;
            LineRead::Line
          }
          Ok(_) => LineRead::Truncated,
          Err(e) => {
            warn!("DistFile: {}: read failed: {}", path.display(), e);
            self.state = ReadState::Failed;
            LineRead::Line
          }
        }
      }
      Err(e) => {
        warn!("DistFile: {}: read failed: {}", path.display(), e);
        self.state = ReadState::Failed;
        if line.len() > start { LineRead::Line } else { LineRead::End }
      }
    }
  }
}

struct SharedBuf {
  // Origin only.
  file:         Option<File>,
  buf:          Vec<u8>,
  filled:       usize,
  cursor:       usize,
  state:        ReadState,
  seek_failed:  bool,
}

impl SharedBuf {
  fn capacity(&self) -> usize {
    self.buf.len()
  }

  fn pending(&self) -> usize {
    self.filled - self.cursor
  }

  /// Compacts the unread tail to the front of the buffer, tops it up from
  /// the origin's file, and broadcasts the new bytes and read state.
  fn refill<P: Proc>(&mut self, proc: &P, path: &Path) {
    let nb = self.pending();
    if nb > 0 && self.cursor > 0 {
      self.buf.copy_within(self.cursor .. self.filled, 0);
    }
    self.cursor = 0;
    self.filled = nb;
    let mut header = [0; REFILL_HEADER_LEN];
    if proc.is_origin() {
      let want = self.capacity() - nb;
      let (nr, state) = match self.file {
        Some(ref mut file) if !self.seek_failed => {
          match read_full(file, &mut self.buf[nb .. ]) {
            (nr, Some(e)) => {
              warn!("DistFile: {}: origin read failed: {}", path.display(), e);
              (nr, ReadState::Failed)
            }
            (nr, None) if nr < want => (nr, ReadState::End),
            (nr, None) => (nr, ReadState::More),
          }
        }
        _ => (0, ReadState::Failed),
      };
      self.filled += nr;
      self.state = state;
      header[ .. 8].copy_from_slice(&(self.filled as u64).to_le_bytes());
      header[8] = state as u8;
    }
    proc.broadcast(&mut header, ORIGIN_RANK);
    if !proc.is_origin() {
      let mut filled = [0; 8];
      filled.copy_from_slice(&header[ .. 8]);
      self.filled = u64::from_le_bytes(filled) as usize;
      self.state = ReadState::from_u8(header[8]);
      assert!(nb <= self.filled && self.filled <= self.capacity(),
          "bug: DistFile: {}: refill header out of range", path.display());
    }
    if self.filled > nb {
      proc.broadcast(&mut self.buf[nb .. self.filled], ORIGIN_RANK);
    }
    debug!("DistFile: {}: rank {}: refill: kept {} appended {} state {:?}",
        path.display(), proc.rank(), nb, self.filled - nb, self.state);
  }

  fn read_elems<P: Proc>(&mut self, proc: &P, path: &Path, dst: &mut [u8], elem_size: usize) -> usize {
    let count = dst.len() / elem_size;
    let mut nread = 0;
    while nread < count {
      let take = min(self.pending() / elem_size, count - nread);
      if take > 0 {
        let nb = take * elem_size;
        let off = nread * elem_size;
        dst[off .. off + nb].copy_from_slice(&self.buf[self.cursor .. self.cursor + nb]);
        self.cursor += nb;
        nread += take;
      }
      if nread == count || self.state != ReadState::More {
        break;
      }
      self.refill(proc, path);
    }
    nread
  }

  fn read_line<P: Proc>(&mut self, proc: &P, path: &Path, limit: usize, line: &mut Vec<u8>) -> LineRead {
    let limit = min(limit, self.capacity());
    while self.pending() < limit && self.state == ReadState::More {
      self.refill(proc, path);
    }
    let avail = min(self.pending(), limit);
    if avail == 0 {
      return LineRead::End;
    }
    let window = &self.buf[self.cursor .. self.cursor + avail];
    let (take, terminated) = match window.iter().position(|&b| b == b'\n') {
      Some(i) => (i + 1, true),
      None => (avail, false),
    };
    line.extend_from_slice(&window[ .. take]);
    self.cursor += take;
    if self.cursor == self.capacity() {
      self.cursor = 0;
      self.filled = 0;
    }
    if !terminated && self.pending() == 0 && self.state == ReadState::More {
      // Look ahead so a last line that exactly fills the buffer is not
      // reported as truncated.
      self.refill(proc, path);
    }
    let drained = self.pending() == 0 && self.state != ReadState::More;
    if terminated || drained {
      LineRead::Line
    } else {
      LineRead::Truncated
    }
  }

  fn rewind(&mut self, path: &Path) {
    self.cursor = 0;
    self.filled = 0;
    self.state = ReadState::More;
    self.seek_failed = false;
    if let Some(ref mut file) = self.file {
      if let Err(e) = file.seek(SeekFrom::Start(0)) {
        warn!("DistFile: {}: origin rewind failed: {}", path.display(), e);
        self.seek_failed = true;
      }
    }
  }
}

enum Backing {
  Local(LocalFile),
  Shared(SharedBuf),
}

/// A read-only file with an identical view on every member of a process
/// group.
///
/// With a disabled buffer, or in a group of one, this is a plain buffered
/// local file. Otherwise only the origin opens the file, and each refill is
/// broadcast so that every member sees the same bytes and end-of-file state.
pub struct DistFile<P: Proc> {
  proc:     P,
  path:     PathBuf,
  backing:  Backing,
}

impl<P: Proc> DistFile<P> {
  pub fn open<Q: AsRef<Path>>(proc: P, path: Q, cap: BufferCap) -> Result<DistFile<P>, OpenError> {
    let mut opts = OpenOptions::new();
    opts.read(true);
    DistFile::open_with(proc, path, &opts, cap)
  }

  /// Opens with caller-supplied options. In buffered mode the options are
  /// only used by the origin.
  ///
  /// An open failure on the origin is broadcast, so every member fails
  /// together.
  pub fn open_with<Q: AsRef<Path>>(proc: P, path: Q, opts: &OpenOptions, cap: BufferCap) -> Result<DistFile<P>, OpenError> {
    let path = path.as_ref().to_owned();
    let capacity = cap.resolve();
    if capacity == 0 || !proc.is_distributed() {
      let file = match opts.open(&path) {
        Err(source) => return Err(OpenError::Local{path, source}),
        Ok(file) => file,
      };
      return Ok(DistFile{
        proc,
        path,
        backing:  Backing::Local(LocalFile{
          reader:   BufReader::new(file),
          state:    ReadState::More,
        }),
      });
    }
    let mut file = None;
    let mut origin_err = None;
    let mut flag = [0_u8];
    if proc.is_origin() {
      match opts.open(&path) {
        Ok(f) => file = Some(f),
        Err(e) => {
          flag[0] = 1;
          origin_err = Some(e);
        }
      }
    }
    proc.broadcast(&mut flag, ORIGIN_RANK);
    if flag[0] != 0 {
      return Err(match origin_err {
        Some(source) => OpenError::Local{path, source},
        None => OpenError::Origin{path, origin: ORIGIN_RANK},
      });
    }
    debug!("DistFile: {}: rank {}: opened with buffer capacity {}",
        path.display(), proc.rank(), capacity);
    Ok(DistFile{
      proc,
      path,
      backing:  Backing::Shared(SharedBuf{
        file,
        buf:          vec![0; capacity],
        filled:       0,
        cursor:       0,
        state:        ReadState::More,
        seek_failed:  false,
      }),
    })
  }

  pub fn proc(&self) -> &P {
    &self.proc
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  /// Zero when the file is read locally on every member.
  pub fn capacity(&self) -> usize {
    match self.backing {
      Backing::Local(_) => 0,
      Backing::Shared(ref s) => s.capacity(),
    }
  }

  pub fn is_shared(&self) -> bool {
    match self.backing {
      Backing::Local(_) => false,
      Backing::Shared(_) => true,
    }
  }

  pub fn state(&self) -> ReadState {
    match self.backing {
      Backing::Local(ref l) => l.state,
      Backing::Shared(ref s) => s.state,
    }
  }

  /// True once the underlying file has been exhausted (or failed). Bytes
  /// may still remain in the buffer.
  pub fn is_eof(&self) -> bool {
    self.state() != ReadState::More
  }

  pub fn is_failed(&self) -> bool {
    self.state() == ReadState::Failed
  }

  /// The valid part of the replicated buffer. Empty for local files.
  pub fn buffered(&self) -> &[u8] {
    match self.backing {
      Backing::Local(_) => &[],
      Backing::Shared(ref s) => &s.buf[ .. s.filled],
    }
  }

  pub fn cursor(&self) -> usize {
    match self.backing {
      Backing::Local(_) => 0,
      Backing::Shared(ref s) => s.cursor,
    }
  }

  /// Reads whole records of `elem_size` bytes into `dst`, as many as fit,
  /// and returns the number of records read. A short count means the file
  /// is exhausted.
  ///
  /// A record larger than the buffer capacity aborts the whole group.
  pub fn read_elems(&mut self, dst: &mut [u8], elem_size: usize) -> usize {
    if elem_size == 0 {
      return 0;
    }
    let len = dst.len() / elem_size * elem_size;
    let dst = &mut dst[ .. len];
    match self.backing {
      Backing::Local(ref mut l) => l.read_elems(&self.path, dst, elem_size),
      Backing::Shared(ref mut s) => {
        if elem_size > s.capacity() {
          if self.proc.is_origin() {
            error!("DistFile: {}: buffer size {} smaller than data size {}",
                self.path.display(), s.capacity(), elem_size);
          }
          self.proc.abort(ABORT_BUFFER_TOO_SMALL);
        }
        s.read_elems(&self.proc, &self.path, dst, elem_size)
      }
    }
  }

  /// Appends the next line to `line`, reading at most `max_len - 1` bytes.
  pub fn read_line(&mut self, max_len: usize, line: &mut Vec<u8>) -> LineRead {
    assert!(max_len >= 2, "DistFile: line limit must leave room for one byte");
    let limit = max_len - 1;
    match self.backing {
      Backing::Local(ref mut l) => l.read_line(&self.path, limit, line),
      Backing::Shared(ref mut s) => s.read_line(&self.proc, &self.path, limit, line),
    }
  }

  /// Returns the next line without its terminator, or `None` at the end of
  /// the stream. Overlong lines come back in pieces.
  pub fn get_line(&mut self, max_len: usize) -> Option<String> {
    let mut line = Vec::new();
    match self.read_line(max_len, &mut line) {
      LineRead::End => None,
      LineRead::Line | LineRead::Truncated => {
        if line.last() == Some(&b'\n') {
          line.pop();
        }
        Some(String::from_utf8_lossy(&line).into_owned())
      }
    }
  }

  /// `get_line` with the configured line limit.
  pub fn next_line(&mut self) -> Option<String> {
    self.get_line(config().line_max)
  }

  /// Returns to the start of the file. In shared mode every member resets
  /// its buffer locally and only the origin seeks; a failed origin seek
  /// surfaces as `ReadState::Failed` on the next refill.
  pub fn rewind(&mut self) -> io::Result<()> {
    match self.backing {
      Backing::Local(ref mut l) => {
        l.state = ReadState::More;
        l.reader.seek(SeekFrom::Start(0))?;
        Ok(())
      }
      Backing::Shared(ref mut s) => {
        s.rewind(&self.path);
        Ok(())
      }
    }
  }

  /// Releases the buffer and, where this member holds one, the file.
  ///
  /// Members without a real file always succeed.
  pub fn close(self) -> io::Result<()> {
    debug!("DistFile: {}: rank {}: close", self.path.display(), self.proc.rank());
    match self.backing {
      Backing::Local(l) => drop(l),
      Backing::Shared(s) => drop(s),
    }
    Ok(())
  }
}

impl<P: Proc> Read for DistFile<P> {
  fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
    let n = self.read_elems(buf, 1);
    if n == 0 && !buf.is_empty() && self.is_failed() {
      return Err(io::Error::new(io::ErrorKind::Other,
          format!("read failed on origin rank for {}", self.path.display())));
    }
    Ok(n)
  }
}
