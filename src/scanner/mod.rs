pub mod parallel;
pub mod walker;

pub use parallel::{CancelHandle, DeepSearch, SearchHandle, SearchState};
pub use walker::{PathFilter, Walk, WalkItem, Walker};
