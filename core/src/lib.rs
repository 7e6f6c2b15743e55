pub mod error;
pub mod sector;
pub mod sniff;

pub use error::{LpError, LpResult};
pub use sniff::{FsSniffer, FsTypeTag, MagicSniffer, SniffResult};
