mod builder;
mod digest_reader;
mod reader;

pub use builder::{BlobBuilder, BlobBuilderOptions};
pub use digest_reader::DigestingReader;
pub use reader::{open_blob, remove_local_file};
