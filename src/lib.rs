#![warn(rust_2018_idioms)]

// re-export sub-crates
pub use http;
pub use rtp;
pub use util;
pub use vocs;
