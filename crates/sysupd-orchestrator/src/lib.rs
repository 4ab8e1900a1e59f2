mod flow;
mod progress;
mod request;
mod state;
mod summary;
mod ui;

pub use flow::{FlowError, Orchestrator, RunOutcome};
pub use progress::{PackageRow, ProgressTracker, Stage, WeightTable, PREFIX_WEIGHT};
pub use request::UpgradeRequest;
pub use state::UpgradeState;
pub use summary::{format_size, TransactionSummary};
pub use ui::{MessageLevel, UpgradeUi};
