//! Engine-wide configuration.
//!
//! A plain, programmatically-constructed struct rather than a file format —
//! `glyph-rt` is embedded into a host process, not run standalone, so there
//! is no config file to parse. Shaped after the teacher's `ResourceLimits`
//! (`resource.rs`): a handful of named limits with a sane-default
//! constructor and `with_*` builder methods.

use std::time::Duration;

/// Default polymorphic inline cache capacity (spec §9 open question 2:
/// `K` is not configurable in the source; treated here as a safe default
/// that callers may override at construction time).
pub const DEFAULT_PIC_CAPACITY: usize = 3;

/// Default bound on native stack frames consumed by non-tail recursion
/// before the trampoline would otherwise be needed; also doubles as the
/// "small constant" bound spec §8 property 2 demands for tail loops driven
/// through the trampoline (which should consume close to *zero* additional
/// native frames per iteration, well under this bound).
pub const DEFAULT_MAX_NATIVE_RECURSION: usize = 128;

/// Default per-request deadline.
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(10);

/// Default grace period after a deadline fires before a context is torn
/// down forcibly (spec §5 "Timeouts").
pub const DEFAULT_CANCELLATION_GRACE: Duration = Duration::from_millis(250);

/// Tunables for one [`crate::api::Engine`] instance.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum number of entries a single call-site's PIC may hold before
    /// falling back to megamorphic resolution (spec §4.1).
    pub pic_capacity: usize,
    /// Number of worker threads backing the bounded execution pool
    /// (spec §5 "multiple contexts may run in parallel on worker threads
    /// from a bounded pool").
    pub worker_threads: usize,
    /// Native call-stack depth at which non-tail recursion is treated as
    /// exceeded (distinct from the trampoline, which handles *tail* calls;
    /// this bound only fires for genuine non-tail recursion).
    pub max_native_recursion: usize,
    /// Default deadline applied to a request when the caller does not
    /// supply one explicitly.
    pub default_deadline: Duration,
    /// Grace window after a deadline fires before the context's worker
    /// thread is forcibly recycled.
    pub cancellation_grace: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pic_capacity: DEFAULT_PIC_CAPACITY,
            worker_threads: std::thread::available_parallelism().map_or(4, std::num::NonZeroUsize::get),
            max_native_recursion: DEFAULT_MAX_NATIVE_RECURSION,
            default_deadline: DEFAULT_DEADLINE,
            cancellation_grace: DEFAULT_CANCELLATION_GRACE,
        }
    }
}

impl EngineConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_pic_capacity(mut self, capacity: usize) -> Self {
        self.pic_capacity = capacity.max(1);
        self
    }

    #[must_use]
    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads.max(1);
        self
    }

    #[must_use]
    pub fn with_max_native_recursion(mut self, depth: usize) -> Self {
        self.max_native_recursion = depth.max(1);
        self
    }

    #[must_use]
    pub fn with_default_deadline(mut self, deadline: Duration) -> Self {
        self.default_deadline = deadline;
        self
    }

    #[must_use]
    pub fn with_cancellation_grace(mut self, grace: Duration) -> Self {
        self.cancellation_grace = grace;
        self
    }
}
