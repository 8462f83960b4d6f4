#![no_std]

pub mod error;
pub mod fs;

pub use error::{SysError, SysResult};
pub use fs::{FileBackedOps, InodeRef};
