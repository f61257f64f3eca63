//! Retype one signal slot of a path.
//!
//! The descriptor swap happens once, at hook initialization, before the
//! signal list freezes; the per-sample conversion then rewrites that slot's
//! representation during the read phase.

use crate::hook::{Hook, HookContext, HookError, Phase, PhaseMask};
use crate::sample::{SampleRef, Value, ValueFormat};
use crate::signal::{Signal, SignalType};

#[derive(Debug, Clone)]
enum Selector {
    Index(usize),
    Name(String),
}

pub struct CastHook {
    selector: Selector,
    new_type: Option<SignalType>,
    new_name: Option<String>,
    new_unit: Option<String>,
    /// Resolved at init: (slot index, original type, new type).
    resolved: Option<(usize, SignalType, SignalType)>,
}

impl CastHook {
    pub fn by_index(index: usize) -> Self {
        Self {
            selector: Selector::Index(index),
            new_type: None,
            new_name: None,
            new_unit: None,
            resolved: None,
        }
    }

    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            selector: Selector::Name(name.into()),
            new_type: None,
            new_name: None,
            new_unit: None,
            resolved: None,
        }
    }

    pub fn to_type(mut self, ty: SignalType) -> Self {
        self.new_type = Some(ty);
        self
    }

    pub fn renamed(mut self, name: impl Into<String>) -> Self {
        self.new_name = Some(name.into());
        self
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.new_unit = Some(unit.into());
        self
    }
}

impl Hook for CastHook {
    fn name(&self) -> &'static str {
        "cast"
    }

    fn phases(&self) -> PhaseMask {
        Phase::Init.mask() | Phase::Read
    }

    fn init(&mut self, ctx: &mut HookContext<'_>) -> Result<(), HookError> {
        let index = match &self.selector {
            Selector::Index(index) => *index,
            Selector::Name(name) => ctx.signals.index_of(name)?,
        };
        let original = ctx
            .signals
            .get(index)
            .ok_or_else(|| HookError::Config(format!("no signal at index {index}")))?
            .clone();

        let new_type = self.new_type.unwrap_or(original.ty);
        let mut replacement = Signal::new(
            self.new_name.clone().unwrap_or_else(|| original.name.clone()),
            new_type,
        );
        replacement.unit = self.new_unit.clone().or_else(|| original.unit.clone());

        ctx.signals.replace(index, replacement)?;
        self.resolved = Some((index, original.ty, new_type));
        Ok(())
    }

    fn process(
        &mut self,
        _phase: Phase,
        samples: &mut Vec<SampleRef>,
    ) -> Result<(), HookError> {
        let (index, from, to) = self
            .resolved
            .ok_or_else(|| HookError::Config("cast hook used before init".into()))?;
        if from == to {
            return Ok(());
        }

        for sample in samples.iter_mut() {
            let body = sample
                .get_mut()
                .expect("read-phase sample not uniquely owned");
            let Some(value) = body.value(index) else {
                continue;
            };
            match to {
                SignalType::Integer => {
                    body.set(index, Value::integer(value.as_float() as i64), ValueFormat::Integer)
                }
                SignalType::Float => {
                    body.set(index, Value::float(value.as_integer() as f64), ValueFormat::Float)
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::Pool;
    use crate::signal::SignalList;
    use crate::stats::SharedStats;

    fn context_parts() -> (SignalList, Pool) {
        let signals = SignalList::new(vec![
            Signal::new("voltage", SignalType::Float).with_unit("V"),
            Signal::new("count", SignalType::Float),
        ]);
        (signals, Pool::new(4, 4))
    }

    #[test]
    fn test_descriptor_swap_at_init() {
        let (mut signals, pool) = context_parts();
        let mut hook = CastHook::by_name("count")
            .to_type(SignalType::Integer)
            .renamed("events")
            .with_unit("1");

        hook.init(&mut HookContext {
            signals: &mut signals,
            pool: &pool,
            stats: SharedStats::default(),
        })
        .unwrap();

        let replaced = signals.get(1).unwrap();
        assert_eq!(replaced.name, "events");
        assert_eq!(replaced.ty, SignalType::Integer);
        assert_eq!(replaced.unit.as_deref(), Some("1"));
        // Untouched fields of other signals survive.
        assert_eq!(signals.get(0).unwrap().unit.as_deref(), Some("V"));
    }

    #[test]
    fn test_slot_conversion() {
        let (mut signals, pool) = context_parts();
        let mut hook = CastHook::by_index(1).to_type(SignalType::Integer);
        hook.init(&mut HookContext {
            signals: &mut signals,
            pool: &pool,
            stats: SharedStats::default(),
        })
        .unwrap();

        let mut samples = pool.alloc_many(1);
        {
            let body = samples[0].get_mut().unwrap();
            body.set(0, Value::float(230.0), ValueFormat::Float);
            body.set(1, Value::float(7.9), ValueFormat::Float);
        }

        hook.process(Phase::Read, &mut samples).unwrap();
        assert_eq!(samples[0].value(1).unwrap().as_integer(), 7);
        assert_eq!(samples[0].slot_format(1), ValueFormat::Integer);
        // The untargeted slot is untouched.
        assert_eq!(samples[0].value(0).unwrap().as_float(), 230.0);
    }

    #[test]
    fn test_unknown_signal_fails_init() {
        let (mut signals, pool) = context_parts();
        let mut hook = CastHook::by_name("missing");
        let err = hook
            .init(&mut HookContext {
                signals: &mut signals,
                pool: &pool,
                stats: SharedStats::default(),
            })
            .unwrap_err();
        assert!(matches!(err, HookError::Signal(_)));
    }
}
