pub mod cleanup;
pub mod decision;
pub mod explanation;

pub use cleanup::{CleanupLoop, DbServerLister, ServerLister};
pub use decision::{DecisionController, ProcessError};
pub use explanation::ExplanationController;
