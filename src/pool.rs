//! Generic async resource pool
//!
//! Bounded set of opaque resources with acquire/release lifecycle,
//! idle/stale garbage collection and single-flight lending. The lending
//! loop is guarded by a re-entrancy flag inside the state mutex and yields
//! cooperatively each iteration; manager hooks always run with the state
//! lock released.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;

/// Future type alias for async manager hook results
pub type HookFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Lifecycle hooks for pooled resources
///
/// All methods except `create` have default implementations, so managers
/// only override what they need. Returning `false` from a `before_*` hook
/// vetoes the transition.
pub trait ResourceManager: Send + Sync {
    type Resource: Send + Sync + 'static;

    fn create(&self) -> HookFuture<'_, Self::Resource>;

    /// Default: drop the resource
    fn destroy(&self, _resource: Arc<Self::Resource>) -> HookFuture<'_, ()> {
        Box::pin(async {})
    }

    /// Default: accept
    fn before_acquire(&self, _resource: &Arc<Self::Resource>) -> HookFuture<'_, bool> {
        Box::pin(async { true })
    }

    /// Default: accept
    fn before_available(&self, _resource: &Arc<Self::Resource>) -> HookFuture<'_, bool> {
        Box::pin(async { true })
    }
}

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_resources: usize,
    /// Max time a resource may sit Available before GC removes it
    pub max_idle_time: Duration,
    /// Max resource age; stale resources are discarded instead of lent
    pub max_life_time: Duration,
    pub gc_interval: Duration,
    /// Disable the background GC task (tests, short-lived pools)
    pub gc: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_resources: 5,
            max_idle_time: Duration::from_secs(10),
            max_life_time: Duration::from_secs(30),
            gc_interval: Duration::from_secs(10),
            gc: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolError {
    /// The pool was destroyed; no further resources will be lent
    Closed,
}

impl std::fmt::Display for PoolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "pool is destroyed"),
        }
    }
}

impl std::error::Error for PoolError {}

struct ResourceWrapper<T> {
    resource: Arc<T>,
    created_at: Instant,
    available_at: Instant,
}

impl<T> ResourceWrapper<T> {
    fn new(resource: Arc<T>) -> Self {
        let now = Instant::now();
        Self {
            resource,
            created_at: now,
            available_at: now,
        }
    }

    fn is_stale(&self, max_life: Duration) -> bool {
        self.created_at.elapsed() >= max_life
    }
}

type Waiter<T> = oneshot::Sender<Result<Arc<T>, PoolError>>;

struct PoolState<T> {
    available: VecDeque<ResourceWrapper<T>>,
    acquired: Vec<ResourceWrapper<T>>,
    waiters: VecDeque<Waiter<T>>,
    is_lending: bool,
    is_destroyed: bool,
}

struct PoolInner<M: ResourceManager> {
    manager: M,
    config: PoolConfig,
    state: Mutex<PoolState<M::Resource>>,
    gc_handle: std::sync::Mutex<Option<JoinHandle<()>>>,
}

/// Generic acquire/release pool handing out `Arc<T>` resources
pub struct Pool<M: ResourceManager + 'static> {
    inner: Arc<PoolInner<M>>,
}

impl<M: ResourceManager + 'static> Clone for Pool<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

enum LendStep<T> {
    Create,
    Discard(ResourceWrapper<T>),
    Lend(ResourceWrapper<T>, Waiter<T>),
    Done,
}

impl<M: ResourceManager + 'static> Pool<M> {
    pub fn new(manager: M, config: PoolConfig) -> Self {
        let inner = Arc::new(PoolInner {
            manager,
            config: config.clone(),
            state: Mutex::new(PoolState {
                available: VecDeque::new(),
                acquired: Vec::new(),
                waiters: VecDeque::new(),
                is_lending: false,
                is_destroyed: false,
            }),
            gc_handle: std::sync::Mutex::new(None),
        });
        let pool = Self { inner };
        if config.gc {
            let weak = Arc::downgrade(&pool.inner);
            let interval = config.gc_interval;
            let handle = tokio::spawn(async move {
                loop {
                    tokio::time::sleep(interval).await;
                    let Some(inner) = weak.upgrade() else { break };
                    Pool { inner }.run_gc().await;
                }
            });
            *pool.inner.gc_handle.lock().unwrap() = Some(handle);
        }
        pool
    }

    /// Wait for a resource. Resolves once one is created or released;
    /// there is no built-in acquisition timeout.
    pub async fn acquire(&self) -> Result<Arc<M::Resource>, PoolError> {
        let rx = {
            let mut state = self.inner.state.lock().await;
            if state.is_destroyed {
                return Err(PoolError::Closed);
            }
            let (tx, rx) = oneshot::channel();
            state.waiters.push_back(tx);
            rx
        };
        self.lend().await;
        rx.await.map_err(|_| PoolError::Closed)?
    }

    /// Return an acquired resource to the pool
    pub async fn release(&self, resource: &Arc<M::Resource>) {
        let wrapper = {
            let mut state = self.inner.state.lock().await;
            if state.is_destroyed {
                return;
            }
            take_by_identity(&mut state.acquired, resource)
        };
        if let Some(mut wrapper) = wrapper {
            if self.inner.manager.before_available(&wrapper.resource).await {
                wrapper.available_at = Instant::now();
                self.inner.state.lock().await.available.push_back(wrapper);
            } else {
                // veto keeps the resource acquired, exactly where it was
                self.inner.state.lock().await.acquired.push(wrapper);
            }
        }
        self.lend().await;
    }

    /// Drop a resource from the pool and destroy it
    pub async fn remove(&self, resource: &Arc<M::Resource>) {
        let found = {
            let mut state = self.inner.state.lock().await;
            let from_available = take_by_identity_deque(&mut state.available, resource);
            from_available.or_else(|| take_by_identity(&mut state.acquired, resource))
        };
        if let Some(wrapper) = found {
            self.inner.manager.destroy(wrapper.resource).await;
        }
        self.lend().await;
    }

    /// Tear the pool down: reject queued waiters, stop GC, destroy every
    /// tracked resource exactly once
    pub async fn destroy(&self) {
        let (resources, waiters) = {
            let mut state = self.inner.state.lock().await;
            if state.is_destroyed {
                return;
            }
            state.is_destroyed = true;
            let mut resources: Vec<_> =
                state.available.drain(..).map(|w| w.resource).collect();
            resources.extend(state.acquired.drain(..).map(|w| w.resource));
            let waiters: Vec<_> = state.waiters.drain(..).collect();
            (resources, waiters)
        };
        if let Some(handle) = self.inner.gc_handle.lock().unwrap().take() {
            handle.abort();
        }
        for waiter in waiters {
            let _ = waiter.send(Err(PoolError::Closed));
        }
        let manager = &self.inner.manager;
        join_all(resources.into_iter().map(|r| manager.destroy(r))).await;
    }

    pub async fn is_available(&self, resource: &Arc<M::Resource>) -> bool {
        let state = self.inner.state.lock().await;
        state
            .available
            .iter()
            .any(|w| Arc::ptr_eq(&w.resource, resource))
    }

    pub async fn is_acquired(&self, resource: &Arc<M::Resource>) -> bool {
        let state = self.inner.state.lock().await;
        state
            .acquired
            .iter()
            .any(|w| Arc::ptr_eq(&w.resource, resource))
    }

    pub async fn contains(&self, resource: &Arc<M::Resource>) -> bool {
        self.is_available(resource).await || self.is_acquired(resource).await
    }

    pub async fn len(&self) -> usize {
        let state = self.inner.state.lock().await;
        state.available.len() + state.acquired.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn is_full(&self) -> bool {
        self.len().await >= self.inner.config.max_resources
    }

    pub async fn has_available_resources(&self) -> bool {
        !self.inner.state.lock().await.available.is_empty()
    }

    /// Single-flight lending loop. The `is_lending` flag keeps concurrent
    /// acquire/release calls from running it twice; hooks run unlocked.
    async fn lend(&self) {
        {
            let mut state = self.inner.state.lock().await;
            if state.is_lending || state.is_destroyed {
                return;
            }
            state.is_lending = true;
        }
        let max_life = self.inner.config.max_life_time;
        loop {
            tokio::task::yield_now().await;

            let step = {
                let mut state = self.inner.state.lock().await;
                if state.is_destroyed || state.waiters.is_empty() {
                    LendStep::Done
                } else if let Some(wrapper) = state.available.pop_front() {
                    if wrapper.is_stale(max_life) {
                        LendStep::Discard(wrapper)
                    } else {
                        // waiter list is non-empty, checked above
                        let waiter = state.waiters.pop_front().unwrap();
                        LendStep::Lend(wrapper, waiter)
                    }
                } else if state.available.len() + state.acquired.len()
                    < self.inner.config.max_resources
                {
                    LendStep::Create
                } else {
                    // full with nothing available; a release re-runs us
                    LendStep::Done
                }
            };

            match step {
                LendStep::Done => break,
                LendStep::Create => {
                    let resource = Arc::new(self.inner.manager.create().await);
                    if self.inner.manager.before_available(&resource).await {
                        let wrapper = ResourceWrapper::new(resource);
                        self.inner.state.lock().await.available.push_back(wrapper);
                    } else {
                        // veto on a fresh resource parks the waiter; the
                        // next acquire or release retries
                        self.inner.manager.destroy(resource).await;
                        break;
                    }
                }
                LendStep::Discard(wrapper) => {
                    self.inner.manager.destroy(wrapper.resource).await;
                }
                LendStep::Lend(mut wrapper, waiter) => {
                    if self.inner.manager.before_acquire(&wrapper.resource).await {
                        let resource = Arc::clone(&wrapper.resource);
                        let mut state = self.inner.state.lock().await;
                        state.acquired.push(wrapper);
                        if let Err(rejected) = waiter.send(Ok(Arc::clone(&resource))) {
                            // waiter gave up; the resource stays acquired
                            // until the caller side releases it
                            drop(rejected);
                        }
                    } else {
                        wrapper.available_at = Instant::now();
                        let mut state = self.inner.state.lock().await;
                        state.available.push_back(wrapper);
                        state.waiters.push_front(waiter);
                        // avoid a veto spin; the next acquire retries
                        state.is_lending = false;
                        return;
                    }
                }
            }
        }
        self.inner.state.lock().await.is_lending = false;
    }

    /// Remove idle and stale available resources
    async fn run_gc(&self) {
        let max_idle = self.inner.config.max_idle_time;
        let max_life = self.inner.config.max_life_time;
        let garbage = {
            let mut state = self.inner.state.lock().await;
            let mut garbage = Vec::new();
            state.available.retain(|wrapper| {
                let idle = wrapper.available_at.elapsed() >= max_idle;
                if idle || wrapper.is_stale(max_life) {
                    garbage.push(Arc::clone(&wrapper.resource));
                    false
                } else {
                    true
                }
            });
            garbage
        };
        for resource in garbage {
            self.inner.manager.destroy(resource).await;
        }
    }
}

fn take_by_identity<T>(
    list: &mut Vec<ResourceWrapper<T>>,
    resource: &Arc<T>,
) -> Option<ResourceWrapper<T>> {
    let idx = list.iter().position(|w| Arc::ptr_eq(&w.resource, resource))?;
    Some(list.remove(idx))
}

fn take_by_identity_deque<T>(
    list: &mut VecDeque<ResourceWrapper<T>>,
    resource: &Arc<T>,
) -> Option<ResourceWrapper<T>> {
    let idx = list.iter().position(|w| Arc::ptr_eq(&w.resource, resource))?;
    list.remove(idx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct Counters {
        created: AtomicUsize,
        destroyed: AtomicUsize,
    }

    impl Counters {
        fn new() -> Self {
            Self {
                created: AtomicUsize::new(0),
                destroyed: AtomicUsize::new(0),
            }
        }
    }

    struct CountingManager(Arc<Counters>);

    impl ResourceManager for CountingManager {
        type Resource = usize;

        fn create(&self) -> HookFuture<'_, usize> {
            let n = self.0.created.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move { n })
        }

        fn destroy(&self, _resource: Arc<usize>) -> HookFuture<'_, ()> {
            self.0.destroyed.fetch_add(1, Ordering::SeqCst);
            Box::pin(async {})
        }
    }

    fn pool(counters: &Arc<Counters>, config: PoolConfig) -> Pool<CountingManager> {
        Pool::new(CountingManager(Arc::clone(counters)), config)
    }

    #[tokio::test]
    async fn acquire_creates_up_to_capacity() {
        let counters = Arc::new(Counters::new());
        let p = pool(&counters, PoolConfig { gc: false, ..PoolConfig::default() });
        let a = p.acquire().await.unwrap();
        let b = p.acquire().await.unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(p.len().await, 2);
        assert_eq!(counters.created.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn second_acquire_waits_for_release() {
        let counters = Arc::new(Counters::new());
        let p = pool(
            &counters,
            PoolConfig { max_resources: 1, gc: false, ..PoolConfig::default() },
        );
        let first = p.acquire().await.unwrap();

        let p2 = p.clone();
        let second = tokio::spawn(async move { p2.acquire().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!second.is_finished());

        p.release(&first).await;
        let second = second.await.unwrap().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(counters.created.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn available_and_acquired_are_mutually_exclusive() {
        let counters = Arc::new(Counters::new());
        let p = pool(&counters, PoolConfig { gc: false, ..PoolConfig::default() });
        let r = p.acquire().await.unwrap();
        assert!(p.is_acquired(&r).await);
        assert!(!p.is_available(&r).await);

        p.release(&r).await;
        assert!(p.is_available(&r).await);
        assert!(!p.is_acquired(&r).await);
        assert!(p.contains(&r).await);
    }

    #[tokio::test]
    async fn stale_resources_are_discarded_on_lend() {
        let counters = Arc::new(Counters::new());
        let p = pool(
            &counters,
            PoolConfig {
                max_resources: 1,
                max_life_time: Duration::from_millis(30),
                gc: false,
                ..PoolConfig::default()
            },
        );
        let first = p.acquire().await.unwrap();
        p.release(&first).await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        let second = p.acquire().await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(counters.destroyed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn gc_removes_idle_resources() {
        let counters = Arc::new(Counters::new());
        let p = pool(
            &counters,
            PoolConfig {
                max_idle_time: Duration::from_millis(30),
                gc_interval: Duration::from_millis(10),
                ..PoolConfig::default()
            },
        );
        let r = p.acquire().await.unwrap();
        p.release(&r).await;

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(p.len().await, 0);
        assert_eq!(counters.destroyed.load(Ordering::SeqCst), 1);
    }

    struct RejectingManager(Arc<Counters>);

    impl ResourceManager for RejectingManager {
        type Resource = usize;

        fn create(&self) -> HookFuture<'_, usize> {
            let n = self.0.created.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move { n })
        }

        fn destroy(&self, _resource: Arc<usize>) -> HookFuture<'_, ()> {
            self.0.destroyed.fetch_add(1, Ordering::SeqCst);
            Box::pin(async {})
        }

        fn before_available(&self, _resource: &Arc<usize>) -> HookFuture<'_, bool> {
            Box::pin(async { false })
        }
    }

    #[tokio::test]
    async fn available_veto_on_create_parks_the_waiter() {
        let counters = Arc::new(Counters::new());
        let p = Pool::new(
            RejectingManager(Arc::clone(&counters)),
            PoolConfig { max_resources: 1, gc: false, ..PoolConfig::default() },
        );

        let p2 = p.clone();
        let waiter = tokio::spawn(async move { p2.acquire().await });
        tokio::time::sleep(Duration::from_millis(50)).await;

        // one create and one destroy, not a create/veto spin; the
        // waiter stays queued until the pool changes
        assert_eq!(counters.created.load(Ordering::SeqCst), 1);
        assert_eq!(counters.destroyed.load(Ordering::SeqCst), 1);
        assert!(!waiter.is_finished());

        p.destroy().await;
        assert_eq!(waiter.await.unwrap(), Err(PoolError::Closed));
    }

    struct GatedManager {
        counters: Arc<Counters>,
        allow_acquire: Arc<AtomicBool>,
    }

    impl ResourceManager for GatedManager {
        type Resource = usize;

        fn create(&self) -> HookFuture<'_, usize> {
            let n = self.counters.created.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move { n })
        }

        fn before_acquire(&self, _resource: &Arc<usize>) -> HookFuture<'_, bool> {
            let ok = self.allow_acquire.load(Ordering::SeqCst);
            Box::pin(async move { ok })
        }
    }

    #[tokio::test]
    async fn acquire_veto_requeues_the_waiter_in_front() {
        let counters = Arc::new(Counters::new());
        let allow = Arc::new(AtomicBool::new(false));
        let p = Pool::new(
            GatedManager {
                counters: Arc::clone(&counters),
                allow_acquire: Arc::clone(&allow),
            },
            PoolConfig { max_resources: 1, gc: false, ..PoolConfig::default() },
        );

        let p2 = p.clone();
        let first = tokio::spawn(async move { p2.acquire().await });
        tokio::time::sleep(Duration::from_millis(50)).await;

        // vetoed: the resource went back to available, the waiter waits
        assert!(!first.is_finished());
        assert_eq!(counters.created.load(Ordering::SeqCst), 1);
        assert!(p.has_available_resources().await);

        allow.store(true, Ordering::SeqCst);
        let p3 = p.clone();
        let second = tokio::spawn(async move { p3.acquire().await });

        // the earlier waiter is served before the one that re-ran lending
        let first = first.await.unwrap().unwrap();
        p.release(&first).await;
        let second = second.await.unwrap().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(counters.created.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn destroy_rejects_waiters_and_destroys_everything_once() {
        let counters = Arc::new(Counters::new());
        let p = pool(
            &counters,
            PoolConfig { max_resources: 1, gc: false, ..PoolConfig::default() },
        );
        let held = p.acquire().await.unwrap();

        let p2 = p.clone();
        let waiter = tokio::spawn(async move { p2.acquire().await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        p.destroy().await;
        assert_eq!(waiter.await.unwrap(), Err(PoolError::Closed));
        assert_eq!(counters.destroyed.load(Ordering::SeqCst), 1);
        assert_eq!(p.acquire().await, Err(PoolError::Closed));

        // releasing after destroy is a no-op
        p.release(&held).await;
        assert_eq!(counters.destroyed.load(Ordering::SeqCst), 1);
    }
}
