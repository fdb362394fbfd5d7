pub mod client;
pub mod stream;
pub mod webhook;
