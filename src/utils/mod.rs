//! Generic utility primitives with zero domain knowledge.
//!
//! - `base_path` - Remote (POSIX) path joining and relative paths
//! - `shell` - Shell escaping, quoting and env prefixes
//! - `template` - `{{token}}` template rendering

pub mod base_path;
pub mod shell;
pub mod template;
