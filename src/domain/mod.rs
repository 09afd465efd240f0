pub mod candle;
pub mod errors;
pub mod events;
pub mod evidence;
pub mod fusion;
pub mod plan;
pub mod ports;
pub mod repositories;
pub mod symbols;
