//! Ambient customer context
//!
//! Makes a customer id implicitly available to tracked calls without passing
//! it through every function. Each execution unit has its own stack of ids:
//!
//! - synchronous code uses a per-thread stack;
//! - async code running inside [`with_customer_async`] (or a spawned task
//!   wrapped by [`spawn_with_context`]) uses a per-task stack, which takes
//!   precedence over the thread stack while the task is being polled.
//!
//! A Tokio task outside [`with_customer_async`] never shares ids with its
//! siblings on the same worker: [`set_customer_context`] is ignored there and
//! [`with_customer`] entries are only visible to the task that opened them.
//!
//! Pushing is always paired with popping: [`CustomerScope`] restores the
//! previous value when dropped, including during unwinding.
//!
//! ```rust,no_run
//! use cmdrdata_anthropic::context::{current_customer, with_customer};
//!
//! let _outer = with_customer("customer-b");
//! {
//!     let _inner = with_customer("customer-a");
//!     assert_eq!(current_customer().as_deref(), Some("customer-a"));
//! }
//! assert_eq!(current_customer().as_deref(), Some("customer-b"));
//! ```

use std::cell::RefCell;
use std::future::Future;
use std::marker::PhantomData;

thread_local! {
    static THREAD_STACK: RefCell<Vec<Entry>> = const { RefCell::new(Vec::new()) };
}

tokio::task_local! {
    static TASK_STACK: RefCell<Vec<String>>;
}

/// A thread-stack entry, tagged with the Tokio task that pushed it.
///
/// Worker threads run many tasks, so an entry is only visible to the task
/// (or the non-task code) that owns it.
#[derive(Debug)]
struct Entry {
    customer_id: String,
    owner: Option<tokio::task::Id>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StackKind {
    Task,
    Thread,
}

fn active_kind() -> StackKind {
    if TASK_STACK.try_with(|_| ()).is_ok() {
        StackKind::Task
    } else {
        StackKind::Thread
    }
}

/// Push `id` and return where to truncate back to.
fn push(id: String) -> Option<(StackKind, usize)> {
    match active_kind() {
        StackKind::Task => TASK_STACK
            .try_with(|cell| {
                let mut stack = cell.borrow_mut();
                let depth = stack.len();
                stack.push(id);
                (StackKind::Task, depth)
            })
            .ok(),
        StackKind::Thread => {
            let owner = tokio::task::try_id();
            THREAD_STACK
                .try_with(|cell| {
                    let mut stack = cell.borrow_mut();
                    let depth = stack.len();
                    stack.push(Entry {
                        customer_id: id,
                        owner,
                    });
                    (StackKind::Thread, depth)
                })
                .ok()
        }
    }
}

fn truncate(kind: StackKind, depth: usize) {
    match kind {
        StackKind::Task => {
            let _ = TASK_STACK.try_with(|cell| cell.borrow_mut().truncate(depth));
        }
        StackKind::Thread => {
            let _ = THREAD_STACK.try_with(|cell| cell.borrow_mut().truncate(depth));
        }
    }
}

/// A task polled without [`with_customer_async`] has no stack of its own.
/// Unscoped set and clear are refused there: the thread stack outlives the
/// poll and the task may resume on another worker.
fn detached_task() -> Option<tokio::task::Id> {
    match active_kind() {
        StackKind::Task => None,
        StackKind::Thread => tokio::task::try_id(),
    }
}

fn normalize(customer_id: String) -> Option<String> {
    let trimmed = customer_id.trim();
    if trimmed.is_empty() {
        None
    } else if trimmed.len() == customer_id.len() {
        Some(customer_id)
    } else {
        Some(trimmed.to_string())
    }
}

/// Push a customer id for the current execution unit.
///
/// Pair with [`clear_customer_context`]; prefer [`with_customer`] which
/// cannot forget the pop. Blank ids are ignored, and so is a call from a
/// Tokio task that is not running inside [`with_customer_async`].
pub fn set_customer_context(customer_id: impl Into<String>) {
    let Some(id) = normalize(customer_id.into()) else {
        tracing::debug!(target: "cmdrdata::context", "ignoring blank customer id");
        return;
    };
    if let Some(task) = detached_task() {
        tracing::debug!(
            target: "cmdrdata::context",
            task = %task,
            "set_customer_context ignored in a task without with_customer_async"
        );
        return;
    }
    push(id);
}

/// Pop the innermost customer id of the current execution unit.
pub fn clear_customer_context() {
    if detached_task().is_some() {
        return;
    }
    match active_kind() {
        StackKind::Task => {
            let _ = TASK_STACK.try_with(|cell| cell.borrow_mut().pop());
        }
        StackKind::Thread => {
            let _ = THREAD_STACK.try_with(|cell| cell.borrow_mut().pop());
        }
    }
}

/// The innermost customer id visible to the current execution unit.
pub fn current_customer() -> Option<String> {
    match active_kind() {
        StackKind::Task => TASK_STACK
            .try_with(|cell| cell.borrow().last().cloned())
            .ok()
            .flatten(),
        StackKind::Thread => {
            let owner = tokio::task::try_id();
            THREAD_STACK
                .try_with(|cell| {
                    cell.borrow()
                        .iter()
                        .rev()
                        .find(|entry| entry.owner == owner)
                        .map(|entry| entry.customer_id.clone())
                })
                .ok()
                .flatten()
        }
    }
}

/// Resolve the customer for a call: explicit argument first, then ambient context.
pub fn effective_customer_id(explicit: Option<&str>) -> Option<String> {
    explicit
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .or_else(current_customer)
}

/// Guard returned by [`with_customer`].
///
/// Not `Send`: a scope belongs to the thread (or task poll) that opened it.
/// Async code that needs the customer across `.await` points should use
/// [`with_customer_async`].
#[must_use = "the customer context is restored as soon as the scope is dropped"]
#[derive(Debug)]
pub struct CustomerScope {
    restore_to: Option<(StackKind, usize)>,
    _not_send: PhantomData<*const ()>,
}

impl Drop for CustomerScope {
    fn drop(&mut self) {
        if let Some((kind, depth)) = self.restore_to {
            truncate(kind, depth);
        }
    }
}

/// Make `customer_id` current until the returned scope is dropped.
///
/// Nested scopes form a stack; dropping a scope restores whatever was current
/// when it was opened, even if the enclosed code pushed without popping.
pub fn with_customer(customer_id: impl Into<String>) -> CustomerScope {
    let Some(id) = normalize(customer_id.into()) else {
        return CustomerScope {
            restore_to: None,
            _not_send: PhantomData,
        };
    };
    CustomerScope {
        restore_to: push(id),
        _not_send: PhantomData,
    }
}

/// Run `fut` with `customer_id` as the ambient customer for its whole lifetime,
/// across every `.await` inside it.
pub async fn with_customer_async<F>(customer_id: impl Into<String>, fut: F) -> F::Output
where
    F: Future,
{
    let mut stack = ContextSnapshot::capture().into_stack();
    if let Some(id) = normalize(customer_id.into()) {
        stack.push(id);
    }
    TASK_STACK.scope(RefCell::new(stack), fut).await
}

/// A frozen copy of the ambient customer, for handing work to another unit.
///
/// Captured values are copies: later changes in the parent are not seen by a
/// unit that already holds a snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContextSnapshot {
    customer_id: Option<String>,
}

impl ContextSnapshot {
    /// Capture the current execution unit's customer.
    pub fn capture() -> Self {
        Self {
            customer_id: current_customer(),
        }
    }

    /// The captured customer id.
    pub fn customer_id(&self) -> Option<&str> {
        self.customer_id.as_deref()
    }

    fn into_stack(self) -> Vec<String> {
        self.customer_id.into_iter().collect()
    }

    /// Run a closure with the snapshot installed on the current thread.
    pub fn run<R>(self, f: impl FnOnce() -> R) -> R {
        let _scope = self.customer_id.map(with_customer);
        f()
    }

    /// Wrap a future so it sees the snapshot for its whole lifetime.
    pub fn scope<F>(self, fut: F) -> impl Future<Output = F::Output>
    where
        F: Future,
    {
        TASK_STACK.scope(RefCell::new(self.into_stack()), fut)
    }
}

/// `tokio::spawn` that carries the caller's customer into the new task.
pub fn spawn_with_context<F>(fut: F) -> tokio::task::JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    tokio::spawn(ContextSnapshot::capture().scope(fut))
}

/// `std::thread::spawn` that carries the caller's customer into the new thread.
pub fn spawn_thread_with_context<F, T>(f: F) -> std::thread::JoinHandle<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let snapshot = ContextSnapshot::capture();
    std::thread::spawn(move || snapshot.run(f))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::sync::Barrier;

    #[test]
    fn nested_scopes_form_a_stack() {
        assert_eq!(current_customer(), None);
        let _b = with_customer("B");
        assert_eq!(current_customer().as_deref(), Some("B"));
        {
            let _a = with_customer("A");
            assert_eq!(current_customer().as_deref(), Some("A"));
        }
        assert_eq!(current_customer().as_deref(), Some("B"));
    }

    #[test]
    fn scope_restores_after_unbalanced_set() {
        {
            let _scope = with_customer("outer");
            set_customer_context("leaked");
            assert_eq!(current_customer().as_deref(), Some("leaked"));
        }
        assert_eq!(current_customer(), None);
    }

    #[test]
    fn scope_restores_on_panic() {
        let result = std::panic::catch_unwind(|| {
            let _scope = with_customer("doomed");
            panic!("boom");
        });
        assert!(result.is_err());
        assert_eq!(current_customer(), None);
    }

    #[test]
    fn set_and_clear_are_paired() {
        set_customer_context("one");
        set_customer_context("two");
        assert_eq!(current_customer().as_deref(), Some("two"));
        clear_customer_context();
        assert_eq!(current_customer().as_deref(), Some("one"));
        clear_customer_context();
        assert_eq!(current_customer(), None);
    }

    #[test]
    fn blank_ids_are_ignored() {
        let _scope = with_customer("   ");
        assert_eq!(current_customer(), None);
        set_customer_context("");
        assert_eq!(current_customer(), None);
    }

    #[test]
    fn explicit_id_wins_over_context() {
        let _scope = with_customer("ambient");
        assert_eq!(
            effective_customer_id(Some("explicit")).as_deref(),
            Some("explicit")
        );
        assert_eq!(effective_customer_id(Some(" ")).as_deref(), Some("ambient"));
        assert_eq!(effective_customer_id(None).as_deref(), Some("ambient"));
    }

    #[test]
    fn threads_do_not_share_context() {
        let _scope = with_customer("main");
        let plain = std::thread::spawn(current_customer).join().ok().flatten();
        assert_eq!(plain, None);
        let inherited = spawn_thread_with_context(current_customer)
            .join()
            .ok()
            .flatten();
        assert_eq!(inherited.as_deref(), Some("main"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_tasks_are_isolated() {
        let barrier = Arc::new(Barrier::new(2));
        let task = |id: &'static str, barrier: Arc<Barrier>| {
            tokio::spawn(with_customer_async(id, async move {
                barrier.wait().await;
                tokio::task::yield_now().await;
                current_customer()
            }))
        };
        let a = task("A", barrier.clone());
        let b = task("B", barrier);
        assert_eq!(a.await.ok().flatten().as_deref(), Some("A"));
        assert_eq!(b.await.ok().flatten().as_deref(), Some("B"));
    }

    #[tokio::test]
    async fn unscoped_set_does_not_leak_to_sibling_tasks() {
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let parked = tokio::spawn(async move {
            set_customer_context("tenant-A");
            let _ = rx.await;
            let seen = current_customer();
            clear_customer_context();
            seen
        });
        tokio::task::yield_now().await;

        let sibling = tokio::spawn(async { current_customer() });
        assert_eq!(sibling.await.ok().flatten(), None);

        let _ = tx.send(());
        assert_eq!(parked.await.ok().flatten(), None);
    }

    #[tokio::test]
    async fn root_context_is_not_visible_in_spawned_tasks() {
        let _scope = with_customer("root-customer");
        assert_eq!(current_customer().as_deref(), Some("root-customer"));

        let plain = tokio::spawn(async { current_customer() });
        assert_eq!(plain.await.ok().flatten(), None);

        let inherited = spawn_with_context(async { current_customer() });
        assert_eq!(inherited.await.ok().flatten().as_deref(), Some("root-customer"));
    }

    #[tokio::test]
    async fn task_scope_is_private_to_its_task() {
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let owner = tokio::spawn(async move {
            let inside = {
                let _scope = with_customer("tenant-B");
                current_customer()
            };
            let _ = rx.await;
            inside
        });
        tokio::task::yield_now().await;
        let sibling = tokio::spawn(async { current_customer() });
        assert_eq!(sibling.await.ok().flatten(), None);
        let _ = tx.send(());
        assert_eq!(owner.await.ok().flatten().as_deref(), Some("tenant-B"));
    }

    #[tokio::test]
    async fn spawned_task_keeps_its_snapshot() {
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let handle = with_customer_async("parent-1", async move {
            let handle = spawn_with_context(async move {
                let _ = rx.await;
                current_customer()
            });
            set_customer_context("parent-2");
            assert_eq!(current_customer().as_deref(), Some("parent-2"));
            handle
        })
        .await;
        let _ = tx.send(());
        let seen = handle.await.ok().flatten();
        assert_eq!(seen.as_deref(), Some("parent-1"));
    }

    #[tokio::test]
    async fn async_scope_survives_await_points() {
        let seen = with_customer_async("cust-async", async {
            tokio::task::yield_now().await;
            let inner = {
                let _nested = with_customer("nested");
                current_customer()
            };
            tokio::task::yield_now().await;
            (inner, current_customer())
        })
        .await;
        assert_eq!(seen.0.as_deref(), Some("nested"));
        assert_eq!(seen.1.as_deref(), Some("cust-async"));
        assert_eq!(current_customer(), None);
    }
}
