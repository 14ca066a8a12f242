use tokio::task::JoinHandle;

// Join handle that aborts its task when dropped, tying background work to
// the lifetime of its owner.
#[derive(Debug)]
pub(crate) struct DroppableHandle<T>(pub(crate) JoinHandle<T>);

impl<T> Drop for DroppableHandle<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}
