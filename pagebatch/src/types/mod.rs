//! Wire types for the remote page API.

pub mod mediawiki;
