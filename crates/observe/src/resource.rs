use std::fmt;

/// Error returned when a resource limit is exceeded.
///
/// Allocation and memory limits are checked by the heap before a slot is
/// handed out; the depth limit bounds recursive host-object conversion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceError {
    /// Maximum number of allocations exceeded.
    Allocation { limit: usize, count: usize },
    /// Maximum memory usage exceeded.
    Memory { limit: usize, used: usize },
    /// Maximum nesting depth exceeded while converting a value tree.
    Depth { limit: usize, depth: usize },
}

impl fmt::Display for ResourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Allocation { limit, count } => {
                write!(f, "allocation limit exceeded: {count} > {limit}")
            }
            Self::Memory { limit, used } => {
                write!(f, "memory limit exceeded: {used} bytes > {limit} bytes")
            }
            Self::Depth { limit, depth } => {
                write!(f, "maximum nesting depth exceeded: {depth} > {limit}")
            }
        }
    }
}

impl std::error::Error for ResourceError {}

/// Accounting hooks the heap calls as records, collections and wrappers come
/// and go.
///
/// The heap is generic over this trait so that [`NoLimitTracker`] compiles
/// every check away, while [`LimitedTracker`] enforces configured limits.
/// Sizes are passed as closures so trackers that ignore memory never compute them.
pub trait ResourceTracker: fmt::Debug {
    /// Called before a new heap entry is handed out.
    fn on_allocate(&mut self, get_size: impl FnOnce() -> usize) -> Result<(), ResourceError>;

    /// Called before an existing record grows in place: a new key, or a value
    /// larger than the one it replaces.
    ///
    /// Growth counts against the allocation budget as well as memory, so a
    /// single record cannot grow without bound. Defaults to [`Self::on_allocate`].
    fn on_container_insert(&mut self, get_size: impl FnOnce() -> usize) -> Result<(), ResourceError> {
        self.on_allocate(get_size)
    }

    /// Called with the bytes an entry was charged when it is freed, or with
    /// the excess when an entry shrinks in place.
    fn on_free(&mut self, get_size: impl FnOnce() -> usize);

    /// Called before descending into the next level of a nested value tree.
    fn check_depth(&self, current_depth: usize) -> Result<(), ResourceError>;

    /// Allocations charged so far, if counted.
    fn allocation_count(&self) -> Option<usize> {
        None
    }

    /// Bytes currently charged, if measured. The heap only settles in-place
    /// shrinkage for trackers that return `Some` here.
    fn current_memory_bytes(&self) -> Option<usize> {
        None
    }
}

/// Configuration for resource limits.
///
/// Every limit is optional and absent fields deserialize as `None`, so a host
/// configuration file only names the limits it wants. Wrappers count like any
/// other entry: a read that wraps a nested record can hit `max_allocations`.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ResourceLimits {
    /// Heap entries plus in-place record growths.
    #[serde(default)]
    pub max_allocations: Option<usize>,
    /// Approximate bytes held by live entries.
    #[serde(default)]
    pub max_memory: Option<usize>,
    /// Maximum nesting depth for host-object import and export.
    #[serde(default)]
    pub max_depth: Option<usize>,
}

/// Maximum nesting depth for value-tree conversion when no limit is configured.
///
/// Lower in debug mode to avoid stack overflow (debug builds use more stack space
/// per call frame).
#[cfg(debug_assertions)]
pub const MAX_DATA_DEPTH: usize = 100;

/// Maximum nesting depth for value-tree conversion when no limit is configured.
#[cfg(not(debug_assertions))]
pub const MAX_DATA_DEPTH: usize = 500;

impl ResourceLimits {
    /// Creates limits with everything disabled except the default nesting depth.
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_depth: Some(MAX_DATA_DEPTH),
            ..Default::default()
        }
    }

    /// Sets the maximum number of allocations.
    #[must_use]
    pub fn max_allocations(mut self, limit: usize) -> Self {
        self.max_allocations = Some(limit);
        self
    }

    /// Sets the maximum memory usage in bytes.
    #[must_use]
    pub fn max_memory(mut self, limit: usize) -> Self {
        self.max_memory = Some(limit);
        self
    }

    /// Sets the maximum nesting depth.
    #[must_use]
    pub fn max_depth(mut self, limit: Option<usize>) -> Self {
        self.max_depth = limit;
        self
    }
}

/// A tracker that never rejects an allocation.
///
/// All hooks are inlined no-ops apart from the default depth guard, so a
/// `Heap<NoLimitTracker>` carries no bookkeeping cost.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLimitTracker;

impl ResourceTracker for NoLimitTracker {
    #[inline]
    fn on_allocate(&mut self, _get_size: impl FnOnce() -> usize) -> Result<(), ResourceError> {
        Ok(())
    }

    #[inline]
    fn on_free(&mut self, _get_size: impl FnOnce() -> usize) {}

    #[inline]
    fn check_depth(&self, current_depth: usize) -> Result<(), ResourceError> {
        if current_depth >= MAX_DATA_DEPTH {
            Err(ResourceError::Depth {
                limit: MAX_DATA_DEPTH,
                depth: current_depth + 1,
            })
        } else {
            Ok(())
        }
    }
}

/// Tracker that enforces a [`ResourceLimits`] configuration.
///
/// Every heap entry and every in-place record growth is one allocation. Memory
/// is the sum of the size estimates charged for live entries; the heap credits
/// back exactly what it charged, so the figure returns to zero once everything
/// is released.
#[derive(Debug, Clone)]
pub struct LimitedTracker {
    limits: ResourceLimits,
    allocation_count: usize,
    current_memory: usize,
}

impl LimitedTracker {
    #[must_use]
    pub fn new(limits: ResourceLimits) -> Self {
        Self {
            limits,
            allocation_count: 0,
            current_memory: 0,
        }
    }

    #[must_use]
    pub fn limits(&self) -> &ResourceLimits {
        &self.limits
    }

    /// Admits one more allocation of `size` bytes, or reports the first limit it breaks.
    fn admit(&self, size: usize) -> Result<(), ResourceError> {
        let count = self.allocation_count + 1;
        if let Some(limit) = self.limits.max_allocations
            && count > limit
        {
            return Err(ResourceError::Allocation { limit, count });
        }
        let used = self.current_memory + size;
        match self.limits.max_memory {
            Some(limit) if used > limit => Err(ResourceError::Memory { limit, used }),
            _ => Ok(()),
        }
    }
}

impl ResourceTracker for LimitedTracker {
    fn on_allocate(&mut self, get_size: impl FnOnce() -> usize) -> Result<(), ResourceError> {
        let size = get_size();
        self.admit(size)?;
        self.allocation_count += 1;
        self.current_memory += size;
        Ok(())
    }

    fn on_free(&mut self, get_size: impl FnOnce() -> usize) {
        let size = get_size();
        debug_assert!(size <= self.current_memory, "freed more memory than was charged");
        self.current_memory = self.current_memory.saturating_sub(size);
    }

    fn check_depth(&self, current_depth: usize) -> Result<(), ResourceError> {
        match self.limits.max_depth {
            Some(limit) if current_depth >= limit => Err(ResourceError::Depth {
                limit,
                depth: current_depth + 1,
            }),
            _ => Ok(()),
        }
    }

    fn allocation_count(&self) -> Option<usize> {
        Some(self.allocation_count)
    }

    fn current_memory_bytes(&self) -> Option<usize> {
        Some(self.current_memory)
    }
}
