pub mod day;
pub mod extract;
pub mod pricing;
pub mod project;
pub mod recap;
pub mod session;

pub use day::DayWindow;
pub use recap::{build_recap, DayRecap, GitActivity, GitCommit, ProjectSummary};
pub use session::{Session, SourceTool, TokenUsage};
