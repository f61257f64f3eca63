//! Priority-ordered sample transforms executed at defined pipeline phases.
//!
//! A hook subscribes to a set of [`Phase`]s. Lifecycle phases run during
//! path build and teardown and fail the path on error; processing phases
//! (`Read`, `Write`) receive the in-flight sample vector and may transform
//! or drop samples; `Async` and `Periodic` run from the periodic emit
//! thread. Hooks are sorted by ascending priority once, when the path is
//! prepared, and membership never changes afterwards.

use enum_as_inner::EnumAsInner;

use crate::mapping::MappingError;
use crate::pool::Pool;
use crate::sample::SampleRef;
use crate::signal::{SignalError, SignalList};
use crate::stats::SharedStats;

/// Default hook priority; hooks run in ascending order.
pub const DEFAULT_PRIORITY: i32 = 99;

/// Pipeline phases a hook can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Init,
    Parse,
    Deinit,
    PathStart,
    PathStop,
    Read,
    Write,
    Async,
    Periodic,
}

impl Phase {
    pub const fn mask(self) -> PhaseMask {
        PhaseMask(1 << self as u32)
    }
}

/// Set of phases, combined with `|`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PhaseMask(u32);

impl PhaseMask {
    pub const EMPTY: Self = Self(0);

    pub const fn contains(self, phase: Phase) -> bool {
        self.0 & Phase::mask(phase).0 != 0
    }
}

impl std::ops::BitOr for PhaseMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl std::ops::BitOr<Phase> for PhaseMask {
    type Output = Self;

    fn bitor(self, rhs: Phase) -> Self {
        self | rhs.mask()
    }
}

impl From<Phase> for PhaseMask {
    fn from(phase: Phase) -> Self {
        phase.mask()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HookError {
    #[error("hook misconfigured: {0}")]
    Config(String),
    #[error(transparent)]
    Signal(#[from] SignalError),
    #[error(transparent)]
    Mapping(#[from] MappingError),
    #[error("pool exhausted during hook processing")]
    PoolUnderrun,
}

/// Outcome of an `Async` tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumAsInner)]
pub enum Tick {
    Proceed,
    Skip,
}

/// Build- and run-time facilities handed to hooks at initialization.
pub struct HookContext<'a> {
    /// Signal descriptors of the path input; the only sanctioned mutation
    /// point before the list freezes at prepare.
    pub signals: &'a mut SignalList,
    /// The path's sample pool, for hooks that allocate replacements.
    pub pool: &'a Pool,
    /// The path's metric set, fed by the ingest thread. Hooks that read
    /// statistics keep a clone.
    pub stats: SharedStats,
}

/// A pipeline stage. Implementations override the phases they subscribe to;
/// the defaults are no-ops.
#[allow(unused_variables)]
pub trait Hook: Send {
    fn name(&self) -> &'static str;

    fn priority(&self) -> i32 {
        DEFAULT_PRIORITY
    }

    /// Phases this hook wants to receive.
    fn phases(&self) -> PhaseMask;

    /// Number of past samples that must stay visible behind the producer
    /// before this hook's queue cursor advances.
    fn history(&self) -> usize {
        0
    }

    fn init(&mut self, ctx: &mut HookContext<'_>) -> Result<(), HookError> {
        Ok(())
    }

    fn parse(&mut self) -> Result<(), HookError> {
        Ok(())
    }

    fn deinit(&mut self) -> Result<(), HookError> {
        Ok(())
    }

    fn path_start(&mut self) -> Result<(), HookError> {
        Ok(())
    }

    fn path_stop(&mut self) -> Result<(), HookError> {
        Ok(())
    }

    /// Transform the sample vector during `Read` or `Write`. Hooks drop
    /// samples by removing them from the vector; the removed references
    /// recycle into the pool when they leave scope.
    fn process(
        &mut self,
        phase: Phase,
        samples: &mut Vec<SampleRef>,
    ) -> Result<(), HookError> {
        Ok(())
    }

    /// Periodic timer tick; returning [`Tick::Skip`] suppresses the
    /// current emission.
    fn tick(&mut self) -> Tick {
        Tick::Proceed
    }

    /// User-visible periodic reporting.
    fn periodic(&mut self) {}
}

/// A registered hook. The queue cursor holding back its `history()`
/// samples lives with the path, which registers one reader per hook at
/// prepare.
pub struct HookEntry {
    pub(crate) hook: Box<dyn Hook>,
}

impl HookEntry {
    pub fn new(hook: Box<dyn Hook>) -> Self {
        Self { hook }
    }

    pub fn hook(&self) -> &dyn Hook {
        self.hook.as_ref()
    }
}

/// The ordered hook list of one path.
#[derive(Default)]
pub struct Pipeline {
    entries: Vec<HookEntry>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, hook: Box<dyn Hook>) {
        self.entries.push(HookEntry::new(hook));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Stable sort by ascending priority; called once at prepare.
    pub(crate) fn sort(&mut self) {
        self.entries.sort_by_key(|entry| entry.hook.priority());
    }

    pub(crate) fn entries_mut(&mut self) -> &mut [HookEntry] {
        &mut self.entries
    }

    pub(crate) fn init(&mut self, ctx: &mut HookContext<'_>) -> Result<(), HookError> {
        for entry in &mut self.entries {
            if entry.hook.phases().contains(Phase::Init) {
                entry.hook.init(ctx)?;
            }
        }
        Ok(())
    }

    pub(crate) fn parse(&mut self) -> Result<(), HookError> {
        for entry in &mut self.entries {
            if entry.hook.phases().contains(Phase::Parse) {
                entry.hook.parse()?;
            }
        }
        Ok(())
    }

    pub(crate) fn deinit(&mut self) -> Result<(), HookError> {
        for entry in &mut self.entries {
            if entry.hook.phases().contains(Phase::Deinit) {
                entry.hook.deinit()?;
            }
        }
        Ok(())
    }

    pub(crate) fn path_start(&mut self) -> Result<(), HookError> {
        for entry in &mut self.entries {
            if entry.hook.phases().contains(Phase::PathStart) {
                entry.hook.path_start()?;
            }
        }
        Ok(())
    }

    pub(crate) fn path_stop(&mut self) -> Result<(), HookError> {
        for entry in &mut self.entries {
            if entry.hook.phases().contains(Phase::PathStop) {
                entry.hook.path_stop()?;
            }
        }
        Ok(())
    }

    /// Run `Read`/`Write` processing over the vector, returning the number
    /// of surviving samples. A failing hook drops the whole vector.
    pub(crate) fn process(&mut self, phase: Phase, samples: &mut Vec<SampleRef>) -> usize {
        for entry in &mut self.entries {
            if !entry.hook.phases().contains(phase) {
                continue;
            }
            if let Err(err) = entry.hook.process(phase, samples) {
                tracing::warn!(hook = entry.hook.name(), %err, "hook failed, dropping vector");
                samples.clear();
                return 0;
            }
        }
        samples.len()
    }

    /// Run the `Async` phase; any hook may veto the tick.
    pub(crate) fn tick(&mut self) -> Tick {
        for entry in &mut self.entries {
            if entry.hook.phases().contains(Phase::Async) && entry.hook.tick().is_skip() {
                return Tick::Skip;
            }
        }
        Tick::Proceed
    }

    pub(crate) fn periodic(&mut self) {
        for entry in &mut self.entries {
            if entry.hook.phases().contains(Phase::Periodic) {
                entry.hook.periodic();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Recorder {
        name: &'static str,
        priority: i32,
        order: Arc<std::sync::Mutex<Vec<&'static str>>>,
    }

    impl Hook for Recorder {
        fn name(&self) -> &'static str {
            self.name
        }

        fn priority(&self) -> i32 {
            self.priority
        }

        fn phases(&self) -> PhaseMask {
            Phase::Read.mask()
        }

        fn process(
            &mut self,
            _phase: Phase,
            _samples: &mut Vec<SampleRef>,
        ) -> Result<(), HookError> {
            self.order.lock().unwrap().push(self.name);
            Ok(())
        }
    }

    struct DropOddSequences;

    impl Hook for DropOddSequences {
        fn name(&self) -> &'static str {
            "drop-odd"
        }

        fn phases(&self) -> PhaseMask {
            Phase::Read.mask() | Phase::Write
        }

        fn process(
            &mut self,
            _phase: Phase,
            samples: &mut Vec<SampleRef>,
        ) -> Result<(), HookError> {
            samples.retain(|smp| smp.sequence % 2 == 0);
            Ok(())
        }
    }

    struct SkipEveryTick(Arc<AtomicUsize>);

    impl Hook for SkipEveryTick {
        fn name(&self) -> &'static str {
            "skip"
        }

        fn phases(&self) -> PhaseMask {
            Phase::Async.mask()
        }

        fn tick(&mut self) -> Tick {
            self.0.fetch_add(1, Ordering::Relaxed);
            Tick::Skip
        }
    }

    #[test]
    fn test_phase_mask_combinators() {
        let mask = Phase::Read.mask() | Phase::Write | Phase::Async;
        assert!(mask.contains(Phase::Read));
        assert!(mask.contains(Phase::Async));
        assert!(!mask.contains(Phase::Init));
        assert!(!PhaseMask::EMPTY.contains(Phase::Read));
    }

    #[test]
    fn test_hooks_run_in_priority_order() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut pipeline = Pipeline::new();
        for (name, priority) in [("late", 200), ("early", 10), ("middle", 99)] {
            pipeline.push(Box::new(Recorder {
                name,
                priority,
                order: order.clone(),
            }));
        }
        pipeline.sort();

        let mut samples = Vec::new();
        pipeline.process(Phase::Read, &mut samples);
        assert_eq!(*order.lock().unwrap(), vec!["early", "middle", "late"]);
    }

    #[test]
    fn test_hook_drops_samples() {
        let pool = crate::pool::Pool::new(8, 1);
        let mut samples = pool.alloc_many(6);
        for (i, smp) in samples.iter_mut().enumerate() {
            smp.get_mut().unwrap().sequence = i as u64;
        }

        let mut pipeline = Pipeline::new();
        pipeline.push(Box::new(DropOddSequences));
        pipeline.sort();

        let accepted = pipeline.process(Phase::Read, &mut samples);
        assert_eq!(accepted, 3);
        assert!(samples.iter().all(|smp| smp.sequence % 2 == 0));
        // Dropped samples went straight back to the pool.
        assert_eq!(pool.in_flight(), 3);
    }

    #[test]
    fn test_async_veto() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut pipeline = Pipeline::new();
        pipeline.push(Box::new(SkipEveryTick(calls.clone())));
        pipeline.sort();

        assert_eq!(pipeline.tick(), Tick::Skip);
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }
}
