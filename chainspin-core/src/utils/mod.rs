pub mod block_wait;
