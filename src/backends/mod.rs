//! Backend adapters shipped with the crate.
//!
//! Engine-specific adapters live with the database client they wrap; the
//! generic [`StreamBackend`] covers any client that accepts a caller-supplied
//! async byte stream.

mod stream;

pub use stream::{StreamBackend, StreamConnection, StreamConnector};
