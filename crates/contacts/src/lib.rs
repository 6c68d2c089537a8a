//! Contact directory: static display name → phone number lookup.

pub mod book;
pub mod directory;

pub use {
    book::ContactBook,
    directory::{Contact, ContactDirectory, DirectoryLoadError, normalize_name},
};
