//! Filesystem primitives shared by the stub and imposter repositories: atomic
//! single-file JSON I/O, advisory-locked read-modify-write, recursive removal,
//! and stable directory listing. Nothing here knows about stubs or imposters.

mod atomic;
mod listing;
mod lock;

pub use atomic::{read_file, remove, write_file};
pub use listing::{load_all_in_dir, next};
pub use lock::locked_read_modify_write;
