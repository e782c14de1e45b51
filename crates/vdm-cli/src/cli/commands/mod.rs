mod fetch;
mod history;
mod remove;

pub use fetch::run_fetch;
pub use history::run_history;
pub use remove::run_remove;
