//! CLI integration tests that converge scratch environments driven by shell
//! scripts.

#![cfg(unix)]

mod common;
mod converge_tests;
