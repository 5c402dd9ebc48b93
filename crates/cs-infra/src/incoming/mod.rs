mod area;
mod sweeper;

pub use area::{IncomingArea, IncomingFile};
pub use sweeper::IncomingSweeper;
