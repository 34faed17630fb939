//! Black-box test infrastructure.
//!
//! Spawns parleyd binaries with generated configs and drives them over
//! the websocket and admin-socket surfaces.

pub mod client;
pub mod server;

#[allow(unused_imports)]
pub use client::TestClient;
#[allow(unused_imports)]
pub use server::{TestOptions, TestServer};
