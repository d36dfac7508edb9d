#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

pub mod config;
pub mod database;
mod error;
pub mod graph;
mod hash;
pub mod key;
mod logging;
pub mod parser;
mod project;
pub mod registry;
pub mod scan;
pub mod task;
pub mod tree;
mod utils;

pub use crate::config::RunConfig;
pub use crate::error::*;
pub use crate::hash::Hash32;
pub use crate::key::{Qualifier, TaskKey};
pub use crate::logging::parse_level;
pub use crate::project::{Batch, Fragment, Project, RunState};
pub use crate::registry::Registry;
pub use crate::task::{Phase, Task, TaskContext, TaskFactory, TaskSpec};
pub use crate::tree::{DependencyTree, Options};
