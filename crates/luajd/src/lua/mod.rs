// Lua 5.1 source emission.

pub mod writer;

pub use writer::write_chunk;
