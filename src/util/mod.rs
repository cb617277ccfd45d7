pub mod bytes;
pub mod filename;
