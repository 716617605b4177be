//! Identifier types shared by the stream store and the projection runner.

mod types;

pub use types::{InvalidName, ProjectionName, StreamName};
