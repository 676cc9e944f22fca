#![warn(rust_2018_idioms)]

pub mod error;
pub mod imf;
pub mod message;

pub use error::Error;
