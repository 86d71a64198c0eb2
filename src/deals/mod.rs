pub mod model;

pub use model::{Deal, DealStage};
