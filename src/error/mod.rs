mod reconcile;

pub use reconcile::{CleanupWarning, ReconcileError, ResultExt};

pub type Result<T, E = ReconcileError> = std::result::Result<T, E>;
