pub mod blocks;
pub mod state;
