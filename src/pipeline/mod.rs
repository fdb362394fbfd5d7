pub mod audio;
pub mod llm;
pub mod stream;
pub mod stt;
pub mod turns;
