pub mod broadcaster;
pub mod engine;
mod error;
pub mod events;
pub mod fee;
pub mod height;
pub mod monitor;
pub mod oracle;
pub mod queue;
pub mod rbf;

#[cfg(test)]
pub(crate) mod test_utils;

use std::fmt::Write;
use std::str::FromStr;

pub use error::{Result, SweepSdkError};

pub fn to_hex_string(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for &b in bytes {
        write!(&mut s, "{:02x}", b).unwrap();
    }
    s
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Where to store the database (in-memory or on disk).
pub enum DatabaseLocation {
    InMemory,
    Directory(String),
}

impl FromStr for DatabaseLocation {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "memory" => Ok(DatabaseLocation::InMemory),
            s => Ok(DatabaseLocation::Directory(s.to_string())),
        }
    }
}

pub fn handle_background_thread_result<T>(
    result: Option<std::result::Result<std::result::Result<T, eyre::Report>, tokio::task::JoinError>>,
) -> eyre::Result<()> {
    match result {
        Some(Ok(thread_result)) => match thread_result {
            Ok(_) => Err(eyre::eyre!("Background thread completed unexpectedly")),
            Err(e) => Err(eyre::eyre!("Background thread failed: {}", e)),
        },
        Some(Err(e)) => Err(eyre::eyre!("Background thread panicked: {}", e)),
        None => Err(eyre::eyre!("Join set panicked with no result")),
    }
}
