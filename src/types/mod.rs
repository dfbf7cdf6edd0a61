pub mod candle;
pub mod position;
pub mod signal;
pub mod timeframe;
pub mod trade;

pub use candle::Candle;
pub use position::{Position, TrailingState};
pub use signal::Signal;
pub use timeframe::Timeframe;
pub use trade::{Trade, TradeSide};
