use std::future::Future;
use std::sync::OnceLock;

use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::JoinHandle;

fn runtime() -> &'static Runtime {
    static RUNTIME: OnceLock<Runtime> = OnceLock::new();
    RUNTIME.get_or_init(|| {
        Builder::new_multi_thread()
            .enable_all()
            .thread_name("rill-runtime")
            .build()
            .expect("failed to build shared tokio runtime")
    })
}

/// Handle to the shared runtime, for callers that need to hand an
/// executor to an externally driven component.
pub fn handle() -> Handle {
    runtime().handle().clone()
}

pub fn spawn<F>(future: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    runtime().spawn(future)
}

pub fn block_on<F: Future>(future: F) -> F::Output {
    if let Ok(current) = Handle::try_current() {
        // Support nested calls from code that is already running inside a
        // Tokio context. This avoids "Cannot start a runtime from within a
        // runtime" panics.
        tokio::task::block_in_place(|| current.block_on(future))
    } else {
        runtime().block_on(future)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    #[test]
    fn spawn_and_block_on_share_one_runtime() {
        let value = crate::block_on(async {
            let task = crate::spawn(async {
                tokio::time::sleep(Duration::from_millis(5)).await;
                41
            });
            task.await.expect("join spawned task") + 1
        });
        assert_eq!(value, 42);
    }

    #[test]
    fn nested_block_on_does_not_panic() {
        let value = crate::block_on(async { crate::block_on(async { 7 }) });
        assert_eq!(value, 7);
    }
}
