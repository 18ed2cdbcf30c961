/*
Copyright 2017 the anode authors

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

//! File access for SPMD process groups: one member reads, every member
//! sees the same bytes.

#[macro_use] extern crate lazy_static;
extern crate log;
#[cfg(feature = "mpi")] extern crate mpi;
extern crate parking_lot;
extern crate thiserror;

pub use crate::bfile::{BufferCap, DistFile, LineRead, OpenError, ReadState};
pub use crate::proc::{Proc, ORIGIN_RANK};
pub use crate::seq::{SeqGuard, seq_begin, seq_end, sequential};

pub mod bfile;
pub mod config;
pub mod proc;
#[cfg(feature = "mpi")] pub mod proc_mpi;
pub mod proc_single;
pub mod proc_thread;
pub mod rank_log;
pub mod seq;
