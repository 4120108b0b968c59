// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Shared test doubles and fixtures for beangraph crates.
#![forbid(unsafe_code)]
//!
//! # Modules
//!
//! - [`beans`] - `Project`/`Task` beans with back-references (cyclic graphs)
//! - [`config`] - In-memory config store fake for testing without filesystem
//! - [`introspect`] - Build-counting, failure-injecting bean introspector
//! - [`transforms`] - Transform-step graph builders

pub mod beans;
pub mod config;
pub mod introspect;
pub mod transforms;

pub use beans::{Project, Task, fixture_catalog, project_with_tasks};
pub use config::InMemoryConfigStore;
pub use introspect::CountingIntrospector;
pub use transforms::{artifact, chain, diamond, step};
