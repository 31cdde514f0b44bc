//! # Triage Logical Backend
//!
//! This crate lets a host directory stand in for a disk image, so a set of
//! already-exported files can be triaged with the same rules and reports as
//! a full image.
//!
//! ## Architecture
//!
//! - `image.rs`: [`LogicalOpener`] and [`LogicalImage`]. No volume system,
//!   no pool, one file system at offset 0
//! - `fs.rs`: [`LogicalFs`], directory listing and content reads through `std::fs`
//!
//! Inode numbers are assigned the first time a path is listed and stay
//! stable for the life of the image.

mod fs;
mod image;

/// Error types specific to the logical backend
pub mod error;

pub use error::LogicalError;
pub use fs::{LogicalFs, ROOT_INODE};
pub use image::{LogicalImage, LogicalOpener};
