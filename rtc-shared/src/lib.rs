#![warn(rust_2018_idioms)]
#![allow(dead_code)]

pub mod error;
pub mod time;

pub use time::MonotonicTime;
