pub mod cycle;
pub mod pool;
pub mod position;
pub mod watchlist;

pub use cycle::*;
pub use pool::*;
pub use position::*;
pub use watchlist::*;
