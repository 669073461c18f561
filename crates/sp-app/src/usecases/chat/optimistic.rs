//! Optimistic state mutation with rollback.

use std::future::Future;

use tokio::sync::watch;

/// Apply `mutation`, run `operation`, and apply `inverse` if it fails.
///
/// Both mutations are published to subscribers. The result is returned
/// untouched so the caller can record the failure.
pub(crate) async fn apply_optimistically<S, T, E, Fut>(
    state: &watch::Sender<S>,
    mutation: impl FnOnce(&mut S),
    operation: Fut,
    inverse: impl FnOnce(&mut S),
) -> Result<T, E>
where
    Fut: Future<Output = Result<T, E>>,
{
    state.send_modify(mutation);
    let result = operation.await;
    if result.is_err() {
        state.send_modify(inverse);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn success_keeps_the_mutation() {
        let (state, _) = watch::channel(vec![1]);

        let result: Result<(), ()> =
            apply_optimistically(&state, |v| v.push(2), async { Ok(()) }, |v| {
                v.pop();
            })
            .await;

        assert!(result.is_ok());
        assert_eq!(*state.borrow(), vec![1, 2]);
    }

    #[tokio::test]
    async fn failure_applies_the_inverse() {
        let (state, _) = watch::channel(vec![1]);

        let result: Result<(), &str> =
            apply_optimistically(&state, |v| v.push(2), async { Err("boom") }, |v| {
                v.pop();
            })
            .await;

        assert_eq!(result, Err("boom"));
        assert_eq!(*state.borrow(), vec![1]);
    }
}
