//! Row binding coordinator.
//!
//! Tracks which locator each row currently wants and gates every completion
//! on that binding: a result is delivered to a row only if, at delivery time,
//! the row is still bound to the locator the result is for. Rows are recycled
//! faster than loads complete, so most stale completions simply find a
//! different locator and are dropped.
//!
//! Per row: `Unbound -> Pending(L) | Deferred(L) -> Delivered | Failed`, with
//! any state overwritten by a new `bind`. A superseded completion leaves the
//! binding untouched, and so does any completion arriving after the binding
//! already reached `Delivered` or `Failed`.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::cache::coordinator::AssetCache;
use crate::cache::locator::Locator;
use crate::config::{ReconcilePolicy, RowConfig};
use crate::rows::source::RowSource;
use crate::transfer::decoder::Decoder;

/// Receives a row's asset, or `None` if loading failed.
pub type RowSink<A> = Arc<dyn Fn(Option<Arc<A>>) + Send + Sync + 'static>;

/// Where a bound row stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingState {
    /// Waiting for scrolling to stop before loading.
    Deferred,
    /// A resolve is outstanding.
    Pending,
    /// The asset was handed to the row.
    Delivered,
    /// The last load for this binding produced nothing.
    Failed,
}

struct Binding<A> {
    locator: Locator,
    state: BindingState,
    sink: RowSink<A>,
}

struct Shared<R, D: Decoder> {
    cache: AssetCache<D>,
    bindings: Mutex<HashMap<R, Binding<D::Asset>>>,
    source: Mutex<Option<Weak<dyn RowSource<R, D::Asset>>>>,
}

/// Binds list rows to locators on top of a shared [`AssetCache`].
///
/// Each screen owns its own coordinator; coordinators share nothing but the
/// cache. Dropping the coordinator turns all of its outstanding completions
/// into no-ops.
pub struct RowBindingCoordinator<R, D: Decoder> {
    shared: Arc<Shared<R, D>>,
    scrolling: AtomicBool,
    config: RowConfig,
}

impl<R, D> RowBindingCoordinator<R, D>
where
    R: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    D: Decoder,
{
    /// Create a coordinator with no bindings and no host attached.
    pub fn new(cache: AssetCache<D>, config: RowConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                cache,
                bindings: Mutex::new(HashMap::new()),
                source: Mutex::new(None),
            }),
            scrolling: AtomicBool::new(false),
            config,
        }
    }

    /// Connect the host list. Only a weak reference is kept.
    pub fn attach_source<S>(&self, source: &Arc<S>)
    where
        S: RowSource<R, D::Asset> + 'static,
    {
        let weak = Arc::downgrade(source);
        let weak: Weak<dyn RowSource<R, D::Asset>> = weak;
        *self.shared.source.lock() = Some(weak);
    }

    /// Bind `row` to `locator`; `on_result` receives the asset unless the row
    /// has been rebound by the time it arrives.
    pub fn bind<F>(&self, row: R, locator: Locator, on_result: F)
    where
        F: Fn(Option<Arc<D::Asset>>) + Send + Sync + 'static,
    {
        self.bind_sink(row, locator, Arc::new(on_result));
    }

    /// Bind `row` to whatever locator the attached source reports for it.
    ///
    /// Returns `false` if there is no live source or the row has no asset.
    pub fn bind_row<F>(&self, row: R, on_result: F) -> bool
    where
        F: Fn(Option<Arc<D::Asset>>) + Send + Sync + 'static,
    {
        let Some(source) = self.shared.source() else {
            return false;
        };
        let Some(locator) = source.locator_for(&row) else {
            return false;
        };
        drop(source);

        self.bind_sink(row, locator, Arc::new(on_result));
        true
    }

    fn bind_sink(&self, row: R, locator: Locator, sink: RowSink<D::Asset>) {
        let defer = self.config.defer_while_scrolling
            && self.is_scrolling()
            && self.shared.cache.peek(&locator).is_none();

        let start = {
            let mut bindings = self.shared.bindings.lock();
            let outstanding = bindings.get(&row).is_some_and(|binding| {
                binding.locator == locator && binding.state == BindingState::Pending
            });

            if outstanding {
                // Same locator with a load outstanding: just take the new sink.
                if let Some(binding) = bindings.get_mut(&row) {
                    binding.sink = sink;
                }
                false
            } else {
                let state = if defer {
                    debug!(row = ?row, locator = %locator, "Deferred load while scrolling");
                    BindingState::Deferred
                } else {
                    BindingState::Pending
                };
                let previous = bindings.insert(
                    row.clone(),
                    Binding {
                        locator: locator.clone(),
                        state,
                        sink,
                    },
                );
                if let Some(previous) = previous.filter(|p| p.locator != locator) {
                    trace!(row = ?row, from = %previous.locator, to = %locator, "Row rebound");
                }
                !defer
            }
        };

        if start {
            Shared::start(&self.shared, row, locator);
        }
    }

    /// Row teardown: forget the binding. Outstanding results are discarded.
    pub fn unbind(&self, row: &R) -> bool {
        self.shared.bindings.lock().remove(row).is_some()
    }

    /// Forget every binding.
    pub fn clear(&self) {
        self.shared.bindings.lock().clear();
    }

    /// Current state of a row's binding.
    pub fn binding_state(&self, row: &R) -> Option<BindingState> {
        self.shared.bindings.lock().get(row).map(|b| b.state)
    }

    /// Locator a row is currently bound to.
    pub fn bound_locator(&self, row: &R) -> Option<Locator> {
        self.shared.bindings.lock().get(row).map(|b| b.locator.clone())
    }

    /// Number of bound rows.
    pub fn len(&self) -> usize {
        self.shared.bindings.lock().len()
    }

    /// Whether no row is bound.
    pub fn is_empty(&self) -> bool {
        self.shared.bindings.lock().is_empty()
    }

    /// Whether a drag or deceleration is in progress.
    pub fn is_scrolling(&self) -> bool {
        self.scrolling.load(Ordering::Acquire)
    }

    /// The user started dragging the list.
    pub fn on_drag_begin(&self) {
        self.scrolling.store(true, Ordering::Release);
    }

    /// The user lifted their finger. Without deceleration the list is at
    /// rest and visible rows are reconciled now; otherwise that waits for
    /// [`Self::on_deceleration_end`].
    pub fn on_drag_end(&self, will_decelerate: bool) {
        if will_decelerate {
            return;
        }
        self.scrolling.store(false, Ordering::Release);
        self.reconcile_visible();
    }

    /// The list came to rest after a fling.
    pub fn on_deceleration_end(&self) {
        self.scrolling.store(false, Ordering::Release);
        self.reconcile_visible();
    }

    /// Re-assert bindings of visible rows according to the configured policy.
    ///
    /// Rows already pending on the right locator are left alone, so running
    /// the sweep repeatedly starts no extra work. Returns the number of rows
    /// for which a resolve was issued.
    pub fn reconcile_visible(&self) -> usize {
        let policy = self.config.reconcile;
        if policy == ReconcilePolicy::Disabled {
            return 0;
        }
        let Some(source) = self.shared.source() else {
            debug!("No row source attached, skipping reconcile");
            return 0;
        };

        // Query the host before taking the lock; it may call back into us.
        let wanted: Vec<(R, Option<Locator>)> = source
            .visible_rows()
            .into_iter()
            .map(|row| {
                let locator = source.locator_for(&row);
                (row, locator)
            })
            .collect();
        drop(source);

        let mut to_start = Vec::new();
        {
            let mut bindings = self.shared.bindings.lock();
            for (row, locator) in wanted {
                let Some(binding) = bindings.get_mut(&row) else {
                    continue;
                };

                if let Some(locator) = locator {
                    if locator != binding.locator {
                        binding.locator = locator.clone();
                        binding.state = BindingState::Pending;
                        to_start.push((row, locator));
                        continue;
                    }
                }

                let restart = match binding.state {
                    BindingState::Deferred => true,
                    BindingState::Failed => policy == ReconcilePolicy::RetryFailed,
                    BindingState::Pending | BindingState::Delivered => false,
                };
                if restart {
                    binding.state = BindingState::Pending;
                    to_start.push((row, binding.locator.clone()));
                }
            }
        }

        let started = to_start.len();
        for (row, locator) in to_start {
            Shared::start(&self.shared, row, locator);
        }
        if started > 0 {
            debug!(started, "Reconciled visible rows");
        }
        started
    }
}

impl<R, D> Shared<R, D>
where
    R: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    D: Decoder,
{
    fn source(&self) -> Option<Arc<dyn RowSource<R, D::Asset>>> {
        self.source.lock().as_ref().and_then(Weak::upgrade)
    }

    fn start(this: &Arc<Self>, row: R, locator: Locator) {
        // Memory hits were post-processed when they were first loaded.
        let fresh = this.cache.peek(&locator).is_none();
        let weak = Arc::downgrade(this);
        let target = locator.clone();

        this.cache.resolve_with(locator, move |asset| {
            if let Some(shared) = weak.upgrade() {
                shared.complete(row, target, asset, fresh);
            }
        });
    }

    fn complete(&self, row: R, locator: Locator, asset: Option<Arc<D::Asset>>, fresh: bool) {
        let sink = {
            let mut bindings = self.bindings.lock();
            match bindings.get_mut(&row) {
                // A row delivers once per binding; a second completion for the
                // same locator (rebound away and back) finds it settled.
                Some(binding)
                    if binding.locator == locator
                        && matches!(
                            binding.state,
                            BindingState::Pending | BindingState::Deferred
                        ) =>
                {
                    binding.state = if asset.is_some() {
                        BindingState::Delivered
                    } else {
                        BindingState::Failed
                    };
                    Some(Arc::clone(&binding.sink))
                }
                _ => None,
            }
        };

        let Some(sink) = sink else {
            debug!(row = ?row, locator = %locator, "Superseded result discarded");
            return;
        };

        let asset = match asset {
            Some(asset) if fresh => Some(self.post_process(&row, &locator, asset)),
            other => other,
        };
        sink(asset);
    }

    fn post_process(&self, row: &R, locator: &Locator, asset: Arc<D::Asset>) -> Arc<D::Asset> {
        let Some(source) = self.source() else {
            return asset;
        };
        match source.post_process(row, &asset) {
            Some(replacement) => {
                let replacement = Arc::new(replacement);
                self.cache.insert(locator.clone(), Arc::clone(&replacement));
                replacement
            }
            None => asset,
        }
    }
}
