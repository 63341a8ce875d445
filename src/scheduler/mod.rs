pub mod block_generator;

pub use block_generator::{generate_next_block, BlockSlot, GeneratedBlock};
