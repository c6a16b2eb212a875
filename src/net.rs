pub mod client;

pub use client::{connect, connect_tcp};
