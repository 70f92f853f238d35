pub mod barrier;
pub mod command_buffer;
