pub mod digest;

pub use digest::{sha256_hex, sha256_hex_file};
