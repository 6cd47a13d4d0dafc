pub mod live_state;
pub mod ticker_stream;

pub use live_state::LiveStateStore;
pub use ticker_stream::{BinanceTickerFeed, Ingestor, TickerFeed};
