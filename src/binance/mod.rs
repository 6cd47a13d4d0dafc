pub mod client;

pub use client::{decode_kline_closes, BinanceClient, KlineClose};
