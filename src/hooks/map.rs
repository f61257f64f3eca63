//! Rebuild samples through the mapping engine.
//!
//! During the read phase every incoming sample is replaced by a fresh pool
//! allocation whose slots are projected through the configured mapping
//! list. The original samples recycle as soon as they are swapped out.
//! Mapping entries with a `stats` source read the path's live metric set,
//! captured from the hook context at initialization.

use crate::hook::{Hook, HookContext, HookError, Phase, PhaseMask};
use crate::mapping::MappingList;
use crate::pool::Pool;
use crate::sample::SampleRef;
use crate::stats::SharedStats;

pub struct MapHook {
    mapping: MappingList,
    pool: Option<Pool>,
    stats: Option<SharedStats>,
}

impl MapHook {
    pub fn new(mapping: MappingList) -> Self {
        Self {
            mapping,
            pool: None,
            stats: None,
        }
    }
}

impl Hook for MapHook {
    fn name(&self) -> &'static str {
        "map"
    }

    fn phases(&self) -> PhaseMask {
        Phase::Init.mask() | Phase::Read
    }

    fn init(&mut self, ctx: &mut HookContext<'_>) -> Result<(), HookError> {
        self.pool = Some(ctx.pool.clone());
        self.stats = Some(ctx.stats.clone());
        Ok(())
    }

    fn process(
        &mut self,
        _phase: Phase,
        samples: &mut Vec<SampleRef>,
    ) -> Result<(), HookError> {
        let pool = self
            .pool
            .as_ref()
            .ok_or_else(|| HookError::Config("map hook used before init".into()))?;
        let stats = self.stats.as_ref().map(|shared| shared.lock().unwrap());

        for sample in samples.iter_mut() {
            let mut fresh = pool.alloc_one().ok_or(HookError::PoolUnderrun)?;
            let body = fresh
                .get_mut()
                .expect("freshly allocated sample not uniquely owned");
            self.mapping.remap(body, sample, stats.as_deref())?;
            *sample = fresh;
        }
        Ok(())
    }
}
