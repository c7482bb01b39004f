#[macro_use]
extern crate log;

pub mod opiterator;
pub mod run_file;
pub mod testutil;
