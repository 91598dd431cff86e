//! Fetch strategy selection.
//!
//! The panel gives no authoritative signal for *why* it changed, so the
//! intent is inferred from how the number of visible conversation links
//! moved since the last cycle:
//! - first run: initial load from the top
//! - exactly one more link: a new conversation appeared at the top
//! - several more links: the user scrolled and the panel revealed older entries
//! - same or fewer: ambiguous, treated like an initial load
//!
//! At most one page is requested per change. The full crawl only happens when
//! asked for explicitly.

/// Why a fetch is being made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchIntent {
    Initial,
    NewChat,
    Scroll,
    /// Legacy full crawl, bounded by the safety cap.
    FetchAll,
}

impl FetchIntent {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchIntent::Initial => "initial",
            FetchIntent::NewChat => "new_chat",
            FetchIntent::Scroll => "scroll",
            FetchIntent::FetchAll => "fetch_all",
        }
    }
}

/// Page window sizes for each intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchLimits {
    pub default_limit: usize,
    pub new_chat_limit: usize,
    pub scroll_batch_size: usize,
    /// Offset ceiling for the full crawl.
    pub safety_cap: usize,
}

impl Default for FetchLimits {
    fn default() -> Self {
        Self {
            default_limit: 50,
            new_chat_limit: 5,
            scroll_batch_size: 28,
            safety_cap: 1000,
        }
    }
}

/// What to request next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchPlan {
    pub intent: FetchIntent,
    pub offset: usize,
    pub limit: usize,
}

#[derive(Debug, Clone, Default)]
pub struct FetchStrategy {
    limits: FetchLimits,
}

impl FetchStrategy {
    pub fn new(limits: FetchLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &FetchLimits {
        &self.limits
    }

    /// Infer the intent behind a change in visible link count.
    pub fn classify(previous: Option<usize>, current: usize) -> FetchIntent {
        match previous {
            None => FetchIntent::Initial,
            Some(prev) if current == prev + 1 => FetchIntent::NewChat,
            Some(prev) if current > prev => FetchIntent::Scroll,
            Some(_) => FetchIntent::Initial,
        }
    }

    pub fn plan(&self, previous: Option<usize>, current: usize) -> FetchPlan {
        self.plan_for(Self::classify(previous, current), previous)
    }

    /// Page window for a known intent. Scrolling resumes after the links
    /// that were already visible.
    pub fn plan_for(&self, intent: FetchIntent, previous: Option<usize>) -> FetchPlan {
        let (offset, limit) = match intent {
            FetchIntent::Initial | FetchIntent::FetchAll => (0, self.limits.default_limit),
            FetchIntent::NewChat => (0, self.limits.new_chat_limit),
            FetchIntent::Scroll => (previous.unwrap_or(0), self.limits.scroll_batch_size),
        };
        FetchPlan {
            intent,
            offset,
            limit,
        }
    }
}
