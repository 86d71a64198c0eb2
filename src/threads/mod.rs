pub mod model;

pub use model::{NextActionOwner, Thread, ThreadCategory};
