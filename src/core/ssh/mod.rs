mod client;

pub use client::{SshExecutor, SshSession};
