//! 运行层：进程组协作者与运行协调器

pub mod coordinator;
pub mod mock;
pub mod process;
pub mod tmux;

pub use coordinator::{RunCoordinator, RunSettings, RunState};
pub use mock::{MockProcessGroups, ProcessCall};
pub use process::ProcessGroups;
pub use tmux::TmuxProcessGroups;
