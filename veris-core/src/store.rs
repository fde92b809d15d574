/// Error surfaced by repository backends. Orchestrators treat any store
/// failure as unexpected and propagate it untouched.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Store backend error: {0}")]
    Backend(String),
}
