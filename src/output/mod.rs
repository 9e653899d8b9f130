//! Output file management

pub mod library;

pub use library::{remove_files, MediaEntry, MediaKind, MediaLibrary};
