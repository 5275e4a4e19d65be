//! converge-lib: Core types and logic for converge
//!
//! This crate provides the pieces of a declarative environment-provisioning
//! engine:
//! - `Manifest`: the desired set of packages, runtimes and standalone binaries
//! - `plan`: dependency-ordered actions for the tools that are not yet satisfied
//! - `execute`: running actions against the live environment with retries
//! - `verify`: probing the environment and reporting drift
//! - `converge`: the loop that drives an environment to match a manifest

pub mod consts;
pub mod converge;
pub mod env_lock;
pub mod environment;
pub mod execute;
pub mod manifest;
pub mod plan;
pub mod platform;
pub mod util;
pub mod verify;
