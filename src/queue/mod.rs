// File-based job queue

pub mod folders;
pub mod jobs;
pub mod stats;
pub mod workers;

pub use folders::{Folder, FolderQueue};
pub use jobs::{Job, JobShape};
pub use workers::{Outcome, PassReport, Worker};
