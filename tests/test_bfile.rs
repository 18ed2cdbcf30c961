extern crate distio;
extern crate env_logger;
extern crate rand;
extern crate tempfile;

use distio::*;
use distio::bfile::{ABORT_BUFFER_TOO_SMALL};
use distio::proc_single::*;
use distio::proc_thread::*;

use rand::{Rng, SeedableRng};
use rand::rngs::{StdRng};
use tempfile::{NamedTempFile};

use std::io::{Read, Write};
use std::path::{PathBuf};

fn init_logging() {
  let _ = env_logger::builder().is_test(true).try_init();
}

fn fixture(data: &[u8]) -> NamedTempFile {
  let mut f = NamedTempFile::new().unwrap();
  f.write_all(data).unwrap();
  f.flush().unwrap();
  f
}

fn pattern(len: usize) -> Vec<u8> {
  (0 .. len).map(|i| (i * 7 % 251) as u8).collect()
}

/// One step of a scripted read sequence.
#[derive(Clone, Copy, Debug)]
enum Step {
  Read{elem_size: usize, count: usize},
  Line{max_len: usize},
  Rewind,
}

fn script(seed: u64, len: usize) -> Vec<Step> {
  let mut rng = StdRng::seed_from_u64(seed);
  (0 .. len).map(|_| match rng.gen_range(0 .. 10) {
    0 => Step::Rewind,
    1 | 2 | 3 => Step::Line{max_len: rng.gen_range(2 ..= 40)},
    _ => Step::Read{elem_size: rng.gen_range(1 ..= 24), count: rng.gen_range(0 ..= 9)},
  }).collect()
}

#[derive(Clone, Debug, PartialEq)]
struct Observed {
  out:      Vec<u8>,
  ret:      usize,
  eof:      bool,
}

#[derive(Clone, Debug, PartialEq)]
struct Snapshot {
  buffered: Vec<u8>,
  cursor:   usize,
  eof:      bool,
}

fn run_step<P: Proc>(file: &mut DistFile<P>, step: Step) -> Observed {
  match step {
    Step::Read{elem_size, count} => {
      let mut out = vec![0; elem_size * count];
      let n = file.read_elems(&mut out, elem_size);
      out.truncate(n * elem_size);
      Observed{out, ret: n, eof: file.is_eof()}
    }
    Step::Line{max_len} => {
      let mut out = vec![];
      let ret = match file.read_line(max_len, &mut out) {
        LineRead::Line => 0,
        LineRead::Truncated => 1,
        LineRead::End => 2,
      };
      Observed{out, ret, eof: file.is_eof()}
    }
    Step::Rewind => {
      file.rewind().unwrap();
      Observed{out: vec![], ret: 0, eof: file.is_eof()}
    }
  }
}

#[test]
fn test_read_complete_records() {
  let k = 10;
  let s = 8;
  let tmp = fixture(&pattern(k * s));
  let path: PathBuf = tmp.path().to_owned();
  let results = ThreadProcGroup::run(3, move |proc| {
    let mut file = DistFile::open(&proc, &path, BufferCap::Bytes(20)).unwrap();
    assert!(file.is_shared());
    let mut dst = vec![0; (k + 1) * s];
    let n = file.read_elems(&mut dst, s);
    let more = file.read_elems(&mut dst[ .. s], s);
    let eof = file.is_eof();
    file.close().unwrap();
    (n, more, eof, dst[ .. k * s].to_vec())
  }).unwrap();
  for res in results {
    let (n, more, eof, data) = res.unwrap();
    assert_eq!(n, k);
    assert_eq!(more, 0);
    assert!(eof);
    assert_eq!(data, pattern(k * s));
  }
}

#[test]
fn test_read_exact_count() {
  let tmp = fixture(&pattern(48));
  let path: PathBuf = tmp.path().to_owned();
  let results = ThreadProcGroup::run(2, move |proc| {
    let mut file = DistFile::open(&proc, &path, BufferCap::Bytes(16)).unwrap();
    let mut dst = vec![0; 48];
    let n = file.read_elems(&mut dst, 12);
    let eof_after_exact = file.is_eof();
    let more = file.read_elems(&mut dst[ .. 12], 12);
    (n, eof_after_exact, more, file.is_eof())
  }).unwrap();
  for res in results {
    let (n, eof_after_exact, more, eof) = res.unwrap();
    assert_eq!(n, 4);
    // The last refill came up short, so the end was already seen.
    assert!(eof_after_exact);
    assert_eq!(more, 0);
    assert!(eof);
  }
}

#[test]
fn test_partial_record_at_end() {
  // 3 whole records and 5 stray bytes.
  let tmp = fixture(&pattern(3 * 16 + 5));
  let path: PathBuf = tmp.path().to_owned();
  let results = ThreadProcGroup::run(3, move |proc| {
    let mut file = DistFile::open(&proc, &path, BufferCap::Bytes(32)).unwrap();
    let mut dst = vec![0; 10 * 16];
    let n = file.read_elems(&mut dst, 16);
    (n, file.is_eof(), file.buffered().len() - file.cursor())
  }).unwrap();
  for res in results {
    assert_eq!(res.unwrap(), (3, true, 5));
  }
}

#[test]
fn test_get_line_splits() {
  let tmp = fixture(b"abc\ndef\n");
  let path: PathBuf = tmp.path().to_owned();
  for &cap in &[4, 5, 64] {
    let path = path.clone();
    let results = ThreadProcGroup::run(3, move |proc| {
      let mut file = DistFile::open(&proc, &path, BufferCap::Bytes(cap)).unwrap();
      (file.get_line(100), file.get_line(100), file.get_line(100))
    }).unwrap();
    for res in results {
      let lines = res.unwrap();
      assert_eq!(lines, (Some("abc".to_owned()), Some("def".to_owned()), None));
    }
  }
}

#[test]
fn test_get_line_single_proc() {
  let tmp = fixture(b"abc\ndef\n");
  let proc = SingleProc;
  let mut file = DistFile::open(proc, tmp.path(), BufferCap::Default).unwrap();
  assert!(!file.is_shared());
  assert_eq!(file.get_line(100), Some("abc".to_owned()));
  assert_eq!(file.get_line(100), Some("def".to_owned()));
  assert_eq!(file.get_line(100), None);
  assert!(file.is_eof());
}

fn read_lines<P: Proc>(file: &mut DistFile<P>, max_len: usize, n: usize) -> Vec<(Vec<u8>, LineRead)> {
  (0 .. n).map(|_| {
    let mut line = vec![];
    let r = file.read_line(max_len, &mut line);
    (line, r)
  }).collect()
}

#[test]
fn test_read_line_truncation() {
  let tmp = fixture(b"abcdefgh\nxy");
  let path: PathBuf = tmp.path().to_owned();
  let expected = vec![
    (b"abc".to_vec(), LineRead::Truncated),
    (b"def".to_vec(), LineRead::Truncated),
    (b"gh\n".to_vec(), LineRead::Line),
    (b"xy".to_vec(), LineRead::Line),
    (vec![], LineRead::End),
  ];

  let mut local = DistFile::open(SingleProc, &path, BufferCap::Default).unwrap();
  assert_eq!(read_lines(&mut local, 4, 5), expected);

  let results = ThreadProcGroup::run(2, move |proc| {
    let mut file = DistFile::open(&proc, &path, BufferCap::Bytes(16)).unwrap();
    read_lines(&mut file, 4, 5)
  }).unwrap();
  for res in results {
    assert_eq!(res.unwrap(), expected);
  }
}

#[test]
fn test_last_line_fills_buffer() {
  let tmp = fixture(b"abcd");
  let path: PathBuf = tmp.path().to_owned();
  let expected = vec![
    (b"abcd".to_vec(), LineRead::Line),
    (vec![], LineRead::End),
    (vec![], LineRead::End),
  ];

  let mut local = DistFile::open(SingleProc, &path, BufferCap::Default).unwrap();
  assert_eq!(read_lines(&mut local, 5, 3), expected);

  let results = ThreadProcGroup::run(2, move |proc| {
    let mut file = DistFile::open(&proc, &path, BufferCap::Bytes(4)).unwrap();
    let lines = read_lines(&mut file, 5, 3);
    (lines, file.is_eof())
  }).unwrap();
  for res in results {
    let (lines, eof) = res.unwrap();
    assert_eq!(lines, expected);
    assert!(eof);
  }
}

#[test]
fn test_long_line_exceeds_buffer() {
  let tmp = fixture(b"0123456789\nab\n");
  let path: PathBuf = tmp.path().to_owned();
  let results = ThreadProcGroup::run(2, move |proc| {
    let mut file = DistFile::open(&proc, &path, BufferCap::Bytes(4)).unwrap();
    let mut lines = vec![];
    loop {
      let mut line = vec![];
      match file.read_line(64, &mut line) {
        LineRead::End => break,
        r => lines.push((String::from_utf8(line).unwrap(), r)),
      }
    }
    lines
  }).unwrap();
  for res in results {
    assert_eq!(res.unwrap(), vec![
      ("0123".to_owned(), LineRead::Truncated),
      ("4567".to_owned(), LineRead::Truncated),
      ("89\n".to_owned(), LineRead::Line),
      ("ab\n".to_owned(), LineRead::Line),
    ]);
  }
}

#[test]
fn test_rewind_repeats_reads() {
  let tmp = fixture(&pattern(200));
  let path: PathBuf = tmp.path().to_owned();
  for &cap in &[0, 7, 64] {
    let path = path.clone();
    let results = ThreadProcGroup::run(3, move |proc| {
      let mut file = DistFile::open(&proc, &path, BufferCap::from(cap)).unwrap();
      let mut first = vec![0; 15 * 3];
      let n1 = file.read_elems(&mut first, 3);
      let _ = file.get_line(10);
      file.rewind().unwrap();
      assert!(!file.is_eof());
      let mut second = vec![0; 15 * 3];
      let n2 = file.read_elems(&mut second, 3);
      (n1, n2, first == second)
    }).unwrap();
    for res in results {
      assert_eq!(res.unwrap(), (15, 15, true));
    }
  }
}

#[test]
fn test_rewind_after_eof() {
  let tmp = fixture(b"line one\nline two\n");
  let path: PathBuf = tmp.path().to_owned();
  let results = ThreadProcGroup::run(2, move |proc| {
    let mut file = DistFile::open(&proc, &path, BufferCap::Bytes(32)).unwrap();
    let mut all = vec![];
    while let Some(line) = file.next_line() {
      all.push(line);
    }
    assert!(file.is_eof());
    file.rewind().unwrap();
    let again = file.next_line();
    (all, again)
  }).unwrap();
  for res in results {
    let (all, again) = res.unwrap();
    assert_eq!(all, vec!["line one", "line two"]);
    assert_eq!(again, Some("line one".to_owned()));
  }
}

#[test]
fn test_convergence_and_local_equivalence() {
  init_logging();
  let mut data = vec![];
  for i in 0 .. 60 {
    data.extend_from_slice(format!("record {} {}\n", i, "x".repeat(i % 13)).as_bytes());
  }
  data.extend_from_slice(&pattern(333));
  let tmp = fixture(&data);
  let path: PathBuf = tmp.path().to_owned();
  let steps = script(0x5eed, 120);

  let mut local = DistFile::open(SingleProc, &path, BufferCap::Default).unwrap();
  let mut expected = vec![];
  for &step in steps.iter() {
    let obs = run_step(&mut local, step);
    // At the end of the file a local reader also swallows any partial
    // record, so stop comparing there.
    if obs.eof {
      break;
    }
    expected.push((obs.out, obs.ret));
  }

  for &cap in &[24, 40, 61, 4096] {
    let path = path.clone();
    let steps = steps.clone();
    let results = ThreadProcGroup::run(4, move |proc| {
      let mut file = DistFile::open(&proc, &path, BufferCap::Bytes(cap)).unwrap();
      let mut observed = vec![];
      let mut snapshots = vec![];
      for &step in steps.iter() {
        observed.push(run_step(&mut file, step));
        snapshots.push(Snapshot{
          buffered: file.buffered().to_vec(),
          cursor:   file.cursor(),
          eof:      file.is_eof(),
        });
      }
      (observed, snapshots)
    }).unwrap();
    let results: Vec<_> = results.into_iter().map(|r| r.unwrap()).collect();
    for (observed, snapshots) in results.iter() {
      assert_eq!(observed, &results[0].0);
      assert_eq!(snapshots, &results[0].1);
    }
    if cap >= 40 {
      // Every scripted line limit fits the buffer.
      for (obs, exp) in results[0].0.iter().zip(expected.iter()) {
        assert_eq!((&obs.out, obs.ret), (&exp.0, exp.1));
      }
    }
  }
}

#[test]
fn test_degraded_mode_reads_locally() {
  let tmp = fixture(b"abc\ndef\n");
  let path: PathBuf = tmp.path().to_owned();
  let results = ThreadProcGroup::run(3, move |proc| {
    let mut file = DistFile::open(&proc, &path, BufferCap::Disabled).unwrap();
    assert!(!file.is_shared());
    assert_eq!(file.capacity(), 0);
    // Members may read differently; each has its own file.
    if proc.rank() == 1 {
      let mut skip = [0; 4];
      assert_eq!(file.read_elems(&mut skip, 4), 1);
    }
    file.get_line(100)
  }).unwrap();
  let lines: Vec<_> = results.into_iter().map(|r| r.unwrap()).collect();
  assert_eq!(lines, vec![Some("abc".to_owned()), Some("def".to_owned()), Some("abc".to_owned())]);
}

#[test]
fn test_read_trait() {
  let data = pattern(1000);
  let tmp = fixture(&data);
  let path: PathBuf = tmp.path().to_owned();
  let results = ThreadProcGroup::run(3, move |proc| {
    let mut file = DistFile::open(&proc, &path, BufferCap::Bytes(97)).unwrap();
    let mut out = vec![];
    file.read_to_end(&mut out).unwrap();
    out
  }).unwrap();
  for res in results {
    assert_eq!(res.unwrap(), data);
  }
}

#[test]
fn test_origin_read_failure_converges() {
  init_logging();
  // Opening a directory succeeds on Linux, but reading it fails.
  let dir = tempfile::tempdir().unwrap();
  let path: PathBuf = dir.path().to_owned();

  let mut local = DistFile::open(SingleProc, &path, BufferCap::Default).unwrap();
  let mut out = vec![];
  assert!(local.read_to_end(&mut out).is_err());
  assert!(local.is_failed());

  let results = ThreadProcGroup::run(3, move |proc| {
    let mut file = DistFile::open(&proc, &path, BufferCap::Bytes(8)).unwrap();
    let mut out = vec![];
    let first_err = file.read_to_end(&mut out).is_err();
    let first_failed = file.is_failed();
    let mut dst = [0; 4];
    let n = file.read_elems(&mut dst, 2);
    file.rewind().unwrap();
    let rewound_failed = file.is_failed();
    let mut line = vec![];
    let r = file.read_line(16, &mut line);
    (first_err, first_failed, n, rewound_failed, r, file.is_failed(), file.buffered().len())
  }).unwrap();
  for res in results {
    assert_eq!(res.unwrap(), (true, true, 0, false, LineRead::End, true, 0));
  }
}

#[test]
fn test_open_failure_is_uniform() {
  init_logging();
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("missing.dat");
  let results = ThreadProcGroup::run(3, move |proc| {
    match DistFile::open(&proc, &path, BufferCap::Default) {
      Ok(_) => "opened",
      Err(OpenError::Local{..}) => "local",
      Err(OpenError::Origin{origin, ..}) => {
        assert_eq!(origin, ORIGIN_RANK);
        "origin"
      }
    }
  }).unwrap();
  let kinds: Vec<_> = results.into_iter().map(|r| r.unwrap()).collect();
  assert_eq!(kinds, vec!["local", "origin", "origin"]);
}

#[test]
fn test_oversized_record_aborts_group() {
  init_logging();
  let tmp = fixture(&pattern(64));
  let path: PathBuf = tmp.path().to_owned();
  let results = ThreadProcGroup::run(3, move |proc| {
    let mut file = DistFile::open(&proc, &path, BufferCap::Bytes(4)).unwrap();
    let mut dst = vec![0; 16];
    file.read_elems(&mut dst, 8)
  }).unwrap();
  for res in results {
    match res {
      Err(ThreadProcError::Aborted(code)) => assert_eq!(code, ABORT_BUFFER_TOO_SMALL),
      Err(e) => panic!("unexpected error: {}", e),
      Ok(n) => panic!("read returned {} instead of aborting", n),
    }
  }
}

#[test]
fn test_zero_size_reads() {
  let tmp = fixture(&pattern(10));
  let path: PathBuf = tmp.path().to_owned();
  let results = ThreadProcGroup::run(2, move |proc| {
    let mut file = DistFile::open(&proc, &path, BufferCap::Bytes(4)).unwrap();
    let mut dst = vec![0; 8];
    let a = file.read_elems(&mut dst, 0);
    let b = file.read_elems(&mut dst[ .. 0], 2);
    (a, b, file.buffered().len(), file.is_eof())
  }).unwrap();
  for res in results {
    assert_eq!(res.unwrap(), (0, 0, 0, false));
  }
}
