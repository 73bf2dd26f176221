use std::fmt;

/// Default maximum depth of nested guest frames before `RecursionError` is raised.
pub const DEFAULT_MAX_RECURSION_DEPTH: usize = 1000;

/// Error returned when a resource limit is exceeded during execution.
///
/// Both variants surface to guest code as ordinary, catchable exceptions:
/// `Allocation` as `MemoryError` and `Recursion` as `RecursionError`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceError {
    /// Maximum number of live heap objects exceeded.
    Allocation { limit: usize, count: usize },
    /// Maximum frame depth exceeded.
    Recursion { limit: usize, depth: usize },
}

impl fmt::Display for ResourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Allocation { limit, count } => write!(f, "allocation limit exceeded: {count} > {limit}"),
            Self::Recursion { .. } => write!(f, "maximum recursion depth exceeded"),
        }
    }
}

impl std::error::Error for ResourceError {}

/// Limits enforced while running guest code.
///
/// ```
/// use echovm::ResourceLimits;
///
/// let limits = ResourceLimits::new().max_recursion_depth(200).max_allocations(10_000);
/// assert_eq!(limits.recursion_depth(), 200);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceLimits {
    max_recursion_depth: usize,
    max_allocations: Option<usize>,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceLimits {
    /// Creates limits with the default recursion depth and no allocation cap.
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_recursion_depth: DEFAULT_MAX_RECURSION_DEPTH,
            max_allocations: None,
        }
    }

    /// Sets the maximum number of nested frames.
    #[must_use]
    pub fn max_recursion_depth(mut self, depth: usize) -> Self {
        self.max_recursion_depth = depth;
        self
    }

    /// Caps the number of live heap objects.
    #[must_use]
    pub fn max_allocations(mut self, limit: usize) -> Self {
        self.max_allocations = Some(limit);
        self
    }

    #[must_use]
    pub fn recursion_depth(&self) -> usize {
        self.max_recursion_depth
    }

    #[must_use]
    pub fn allocation_limit(&self) -> Option<usize> {
        self.max_allocations
    }

    /// Checks a prospective frame depth against the limit.
    pub(crate) fn check_recursion_depth(&self, depth: usize) -> Result<(), ResourceError> {
        if depth > self.max_recursion_depth {
            Err(ResourceError::Recursion {
                limit: self.max_recursion_depth,
                depth,
            })
        } else {
            Ok(())
        }
    }
}
