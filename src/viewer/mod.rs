pub mod engine;
pub mod favorites;
pub mod format;
pub mod history;
pub mod render;
pub mod session;

pub use engine::{DisplayRow, HistoryFetch, HistoryStatus, ReconciliationEngine};
pub use favorites::{FavoriteSet, FavoriteStore};
pub use session::{HistoryClient, ViewerSession};
