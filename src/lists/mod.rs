//! Focus and Waiting lists.

pub mod ranker;
pub mod service;

pub use ranker::{FocusList, ListStatistics, WaitingList, WaitingListOptions};
pub use service::ListService;
