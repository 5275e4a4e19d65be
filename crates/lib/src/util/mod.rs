//! Shared utilities.

mod cancel;
mod shell;

pub use cancel::CancelSignal;
pub use shell::{shell_quote, shell_quote_path};

#[cfg(test)]
pub mod testutil;
