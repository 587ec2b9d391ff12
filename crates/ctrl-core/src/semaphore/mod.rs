//! Resizable FIFO semaphore bounding concurrently running test units.
//!
//! ## Contract
//! - [`BoundedSemaphore::acquire`] enqueues the caller immediately (not on first poll), so the
//!   order of `acquire()` calls is the order in which slots are granted.
//! - A released slot is handed straight to the longest-waiting caller.
//! - [`BoundedSemaphore::resize`] never revokes held slots; growing admits queued waiters at once.
//! - [`BoundedSemaphore::await_drained`] resolves when no slot is held any more.
use std::{
    collections::VecDeque,
    future::Future,
    pin::Pin,
    sync::{Arc, Mutex, MutexGuard},
    task::{Context, Poll},
};

use tokio::{sync::oneshot, task::JoinHandle};
use tracing::trace;

use crate::error::CoreError;

/// Counting semaphore with a FIFO waiter queue and dynamic capacity.
#[derive(Clone)]
pub struct BoundedSemaphore {
    inner: Arc<Inner>,
}

struct Inner {
    state: Mutex<State>,
}

struct State {
    capacity: usize,
    held: usize,
    waiters: VecDeque<oneshot::Sender<()>>,
    drained: Vec<oneshot::Sender<()>>,
}

impl BoundedSemaphore {
    /// Create a semaphore with `capacity` free slots.
    ///
    /// Fails with [`CoreError::InvalidArgument`] when `capacity == 0`.
    pub fn new(capacity: usize) -> Result<Self, CoreError> {
        if capacity == 0 {
            return Err(CoreError::InvalidArgument(
                "semaphore capacity must be positive".into(),
            ));
        }
        Ok(Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    capacity,
                    held: 0,
                    waiters: VecDeque::new(),
                    drained: Vec::new(),
                }),
            }),
        })
    }

    /// Current ceiling.
    pub fn capacity(&self) -> usize {
        self.inner.lock().capacity
    }

    /// Slots that can be granted right now without waiting.
    pub fn available(&self) -> usize {
        let st = self.inner.lock();
        st.capacity.saturating_sub(st.held)
    }

    /// Slots granted and not yet released.
    pub fn held(&self) -> usize {
        self.inner.lock().held
    }

    /// Callers queued behind the ceiling.
    pub fn waiting(&self) -> usize {
        let st = self.inner.lock();
        st.waiters.iter().filter(|tx| !tx.is_closed()).count()
    }

    /// Take a slot, waiting in FIFO order if none is free.
    ///
    /// The caller is queued by this call; dropping the returned future leaves the queue and,
    /// if a slot was already handed over, gives it back.
    pub fn acquire(&self) -> Acquire {
        let mut st = self.inner.lock();
        st.prune_closed();

        if st.waiters.is_empty() && st.held < st.capacity {
            st.held += 1;
            return Acquire {
                sem: Arc::clone(&self.inner),
                state: AcquireState::Ready,
            };
        }

        let (tx, rx) = oneshot::channel();
        st.waiters.push_back(tx);
        trace!(queued = st.waiters.len(), "semaphore full; caller queued");
        Acquire {
            sem: Arc::clone(&self.inner),
            state: AcquireState::Waiting(rx),
        }
    }

    /// Take a slot only if one is free and nobody is queued ahead.
    pub fn try_acquire(&self) -> Option<SemaphorePermit> {
        let mut st = self.inner.lock();
        st.prune_closed();

        if st.waiters.is_empty() && st.held < st.capacity {
            st.held += 1;
            Some(SemaphorePermit::new(Arc::clone(&self.inner)))
        } else {
            None
        }
    }

    /// Change the ceiling.
    ///
    /// Growing admits queued waiters immediately. Shrinking only affects future grants.
    /// A capacity of zero is allowed here and admits nothing until resized again.
    pub fn resize(&self, capacity: usize) {
        let mut st = self.inner.lock();
        let old = st.capacity;
        st.capacity = capacity;
        st.admit();
        trace!(old, new = capacity, held = st.held, "semaphore resized");
    }

    /// Resolve once every held slot has been released.
    ///
    /// Resolves immediately if nothing is outstanding.
    pub fn await_drained(&self) -> impl Future<Output = ()> + Send + 'static {
        let rx = {
            let mut st = self.inner.lock();
            if st.held == 0 {
                None
            } else {
                let (tx, rx) = oneshot::channel();
                st.drained.push(tx);
                Some(rx)
            }
        };
        async move {
            if let Some(rx) = rx {
                let _ = rx.await;
            }
        }
    }

    /// Acquire, run `task`, release on completion, failure or cancellation.
    pub async fn fire<F, Fut>(&self, task: F) -> Fut::Output
    where
        F: FnOnce() -> Fut,
        Fut: Future,
    {
        let _permit = self.acquire().await;
        task().await
    }

    /// Acquire, then run `task` in the background holding the slot.
    ///
    /// Returns once the slot is granted. The slot is released when the task finishes,
    /// fails or panics.
    pub async fn fire_and_forget<Fut>(&self, task: Fut) -> JoinHandle<Fut::Output>
    where
        Fut: Future + Send + 'static,
        Fut::Output: Send + 'static,
    {
        let permit = self.acquire().await;
        tokio::spawn(async move {
            let _permit = permit;
            task.await
        })
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn release(&self) {
        let drained = {
            let mut st = self.lock();
            st.held = st.held.saturating_sub(1);
            st.admit();
            if st.held == 0 {
                std::mem::take(&mut st.drained)
            } else {
                Vec::new()
            }
        };
        for tx in drained {
            let _ = tx.send(());
        }
    }
}

impl State {
    /// Hand free slots to queued waiters in arrival order.
    fn admit(&mut self) {
        while self.held < self.capacity {
            let Some(tx) = self.waiters.pop_front() else {
                break;
            };
            if tx.send(()).is_ok() {
                self.held += 1;
            }
        }
    }

    fn prune_closed(&mut self) {
        while self.waiters.front().is_some_and(|tx| tx.is_closed()) {
            self.waiters.pop_front();
        }
    }
}

/// A held slot. Dropping it releases the slot.
#[must_use = "the slot is released as soon as the permit is dropped"]
pub struct SemaphorePermit {
    sem: Option<Arc<Inner>>,
}

impl SemaphorePermit {
    fn new(sem: Arc<Inner>) -> Self {
        Self { sem: Some(sem) }
    }

    /// Release explicitly. Same as dropping.
    pub fn release(self) {
        drop(self)
    }
}

impl Drop for SemaphorePermit {
    fn drop(&mut self) {
        if let Some(sem) = self.sem.take() {
            sem.release();
        }
    }
}

/// Future returned by [`BoundedSemaphore::acquire`].
pub struct Acquire {
    sem: Arc<Inner>,
    state: AcquireState,
}

enum AcquireState {
    Ready,
    Waiting(oneshot::Receiver<()>),
    Done,
}

impl Future for Acquire {
    type Output = SemaphorePermit;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match &mut this.state {
            AcquireState::Ready => {
                this.state = AcquireState::Done;
                Poll::Ready(SemaphorePermit::new(Arc::clone(&this.sem)))
            }
            AcquireState::Waiting(rx) => match Pin::new(rx).poll(cx) {
                Poll::Ready(Ok(())) => {
                    this.state = AcquireState::Done;
                    Poll::Ready(SemaphorePermit::new(Arc::clone(&this.sem)))
                }
                Poll::Ready(Err(_)) => {
                    // Sender vanished without a grant; queue again at the back.
                    let (tx, rx) = oneshot::channel();
                    {
                        let mut st = this.sem.lock();
                        st.waiters.push_back(tx);
                        st.admit();
                    }
                    this.state = AcquireState::Waiting(rx);
                    cx.waker().wake_by_ref();
                    Poll::Pending
                }
                Poll::Pending => Poll::Pending,
            },
            AcquireState::Done => Poll::Pending,
        }
    }
}

impl Drop for Acquire {
    fn drop(&mut self) {
        match std::mem::replace(&mut self.state, AcquireState::Done) {
            AcquireState::Ready => self.sem.release(),
            AcquireState::Waiting(mut rx) => {
                rx.close();
                if rx.try_recv().is_ok() {
                    self.sem.release();
                }
            }
            AcquireState::Done => {}
        }
    }
}
