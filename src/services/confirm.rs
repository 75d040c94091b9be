use super::BoxFuture;

/// Asks the user whether to go ahead, without blocking the caller.
#[cfg_attr(test, mockall::automock)]
pub trait Confirm: Send + Sync {
    fn ask(&self, message: String) -> BoxFuture<bool>;
}

/// Always gives the same answer. `FixedAnswer(false)` is the safe default
/// when nobody can be asked.
#[derive(Debug, Clone, Copy)]
pub struct FixedAnswer(pub bool);

impl Default for FixedAnswer {
    fn default() -> Self {
        FixedAnswer(false)
    }
}

impl Confirm for FixedAnswer {
    fn ask(&self, message: String) -> BoxFuture<bool> {
        let answer = self.0;
        tracing::debug!("Answering '{}' with {}", message, answer);
        Box::pin(async move { answer })
    }
}
