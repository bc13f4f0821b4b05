//! Command-line interface types for the `ferry` binary.

mod args;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use args::*;
