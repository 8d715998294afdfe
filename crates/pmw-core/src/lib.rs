#![forbid(unsafe_code)]
#![deny(unreachable_pub)]

//! Master-side task distribution core.
//!
//! A driver submits independent computational units (a registered handler
//! plus serialized input) through [`master::Master`] and retrieves their
//! results asynchronously. Work is dispatched across whatever pool of
//! workers a [`backend::Backend`] implementation advertises; the core does
//! not know or care whether that pool is local threads, remote processes, or
//! something else.

pub mod backend;
pub mod bundle;
pub mod error;
pub mod events;
pub mod mapreduce;
pub mod master;
pub mod scheduler;
pub mod task;
pub mod tasklist;
pub mod worker_proto;

pub use backend::{Backend, WorkerHandle};
pub use bundle::{BundleGenerator, FunctionBundle};
pub use error::PmwError;
pub use events::MasterEvent;
pub use mapreduce::{MapReduceInput, submit_mapreduce};
pub use master::{Executable, HandlerRef, Master, MasterOptions, StatusSnapshot, TaskSelector, TaskSpec};
pub use task::{Task, TaskOutput};
pub use worker_proto::HandlerTable;
