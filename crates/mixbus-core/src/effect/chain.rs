//! Ordered effect chains
//!
//! A chain exclusively owns its effects. Slots are `basedrop::Owned`, so an
//! effect removed on the audio thread is freed by the collector thread, and
//! the backing vector reserves [`MAX_EFFECTS_PER_CHAIN`] up front so that
//! insertions never reallocate.

use basedrop::Owned;

use crate::buffer::AudioBuffer;
use crate::effect::{BuiltinEffect, Effect};
use crate::error::{EngineError, EngineResult};

/// Maximum number of effects in one chain
pub const MAX_EFFECTS_PER_CHAIN: usize = 16;

/// Effects applied in order to one bus
pub struct EffectChain {
    effects: Vec<Owned<BuiltinEffect>>,
}

impl Default for EffectChain {
    fn default() -> Self {
        Self::new()
    }
}

impl EffectChain {
    pub fn new() -> Self {
        Self {
            effects: Vec::with_capacity(MAX_EFFECTS_PER_CHAIN),
        }
    }

    pub fn len(&self) -> usize {
        self.effects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.effects.len() >= MAX_EFFECTS_PER_CHAIN
    }

    pub fn get(&self, index: usize) -> Option<&BuiltinEffect> {
        self.effects.get(index).map(|e| &**e)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut BuiltinEffect> {
        self.effects.get_mut(index).map(|e| &mut **e)
    }

    pub fn iter(&self) -> impl Iterator<Item = &BuiltinEffect> {
        self.effects.iter().map(|e| &**e)
    }

    /// Insert at `index` (clamped to the end); returns the final position
    ///
    /// Real-time safe. On failure the effect is handed back with the error.
    pub fn insert(
        &mut self,
        index: usize,
        effect: Owned<BuiltinEffect>,
    ) -> Result<usize, (EngineError, Owned<BuiltinEffect>)> {
        if self.is_full() {
            return Err((
                EngineError::ChainCapacityExceeded {
                    max: MAX_EFFECTS_PER_CHAIN,
                },
                effect,
            ));
        }
        let index = index.min(self.effects.len());
        self.effects.insert(index, effect);
        Ok(index)
    }

    /// Append; returns the position
    pub fn push(&mut self, effect: Owned<BuiltinEffect>) -> EngineResult<usize> {
        self.insert(usize::MAX, effect).map_err(|(e, _)| e)
    }

    /// Remove and return the effect at `index`
    pub fn remove(&mut self, index: usize) -> Option<Owned<BuiltinEffect>> {
        if index < self.effects.len() {
            Some(self.effects.remove(index))
        } else {
            None
        }
    }

    /// Move the effect at `from` so it ends up at `to`
    pub fn move_effect(&mut self, from: usize, to: usize) -> bool {
        let len = self.effects.len();
        if from >= len || to >= len {
            return false;
        }
        if from < to {
            self.effects[from..=to].rotate_left(1);
        } else {
            self.effects[to..=from].rotate_right(1);
        }
        true
    }

    /// Drop every effect (deallocation deferred to the collector)
    pub fn clear(&mut self) {
        self.effects.clear();
    }

    /// Run every effect in order; disabled effects pass through
    pub fn process(&mut self, buffer: &mut AudioBuffer, time: f64) -> EngineResult<()> {
        for effect in &mut self.effects {
            effect.process(buffer, time)?;
        }
        Ok(())
    }

    /// Reset every effect's internal state
    pub fn reset(&mut self) {
        for effect in &mut self.effects {
            effect.reset();
        }
    }

    /// Total latency of the enabled effects
    pub fn latency_frames(&self) -> usize {
        self.effects
            .iter()
            .filter(|e| e.is_enabled())
            .map(|e| e.latency_frames())
            .sum()
    }
}

impl std::fmt::Debug for EffectChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.iter().map(|e| e.kind())).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::AudioBufferDesc;
    use crate::effect::EffectKind;
    use crate::engine::gc_handle;

    fn owned(kind: EffectKind) -> Owned<BuiltinEffect> {
        Owned::new(&gc_handle(), BuiltinEffect::new(kind, 48000, 2))
    }

    fn volume(db: f32) -> Owned<BuiltinEffect> {
        let mut effect = BuiltinEffect::new(EffectKind::Volume, 48000, 2);
        effect.set_parameter("gain_db", db).unwrap();
        Owned::new(&gc_handle(), effect)
    }

    fn kinds(chain: &EffectChain) -> Vec<EffectKind> {
        chain.iter().map(|e| e.kind()).collect()
    }

    #[test]
    fn test_insert_remove_move() {
        let mut chain = EffectChain::new();
        chain.push(owned(EffectKind::Volume)).unwrap();
        chain.push(owned(EffectKind::Compressor)).unwrap();
        assert_eq!(chain.insert(1, owned(EffectKind::Equalizer)).ok(), Some(1));
        assert_eq!(
            kinds(&chain),
            vec![EffectKind::Volume, EffectKind::Equalizer, EffectKind::Compressor]
        );

        assert!(chain.move_effect(0, 2));
        assert_eq!(
            kinds(&chain),
            vec![EffectKind::Equalizer, EffectKind::Compressor, EffectKind::Volume]
        );
        assert!(chain.move_effect(2, 0));
        assert_eq!(kinds(&chain)[0], EffectKind::Volume);
        assert!(!chain.move_effect(0, 3));

        let removed = chain.remove(1).unwrap();
        assert_eq!(removed.kind(), EffectKind::Equalizer);
        assert!(chain.remove(5).is_none());
        assert_eq!(chain.len(), 2);
    }

    #[test]
    fn test_capacity_limit() {
        let mut chain = EffectChain::new();
        for _ in 0..MAX_EFFECTS_PER_CHAIN {
            chain.push(owned(EffectKind::Volume)).unwrap();
        }
        assert!(matches!(
            chain.push(owned(EffectKind::Volume)),
            Err(EngineError::ChainCapacityExceeded { max: 16 })
        ));
    }

    #[test]
    fn test_disabled_effect_keeps_position() {
        let mut chain = EffectChain::new();
        chain.push(volume(-6.0)).unwrap();
        chain.push(volume(-6.0)).unwrap();
        chain.get_mut(0).unwrap().set_enabled(false);

        let mut buffer = AudioBuffer::constant(AudioBufferDesc::new(48000, 2, 8), 1.0).unwrap();
        chain.process(&mut buffer, 0.0).unwrap();
        assert!((buffer.get(0, 0) - 0.501_187).abs() < 1e-5);

        chain.get_mut(0).unwrap().set_enabled(true);
        assert_eq!(chain.len(), 2);
        let mut buffer = AudioBuffer::constant(AudioBufferDesc::new(48000, 2, 8), 1.0).unwrap();
        chain.process(&mut buffer, 0.0).unwrap();
        assert!((buffer.get(0, 0) - 0.251_189).abs() < 1e-5);
    }

    #[test]
    fn test_default_chain_keeps_silence() {
        let mut chain = EffectChain::new();
        for kind in EffectKind::ALL {
            chain.push(owned(kind)).unwrap();
        }
        let mut buffer = AudioBuffer::allocate(AudioBufferDesc::new(48000, 2, 1024)).unwrap();
        for _ in 0..4 {
            chain.process(&mut buffer, 0.0).unwrap();
            assert!(buffer.samples().iter().all(|&s| s.abs() <= 1e-9));
        }
    }

    #[test]
    fn test_latency_sums_enabled_effects() {
        let mut chain = EffectChain::new();
        let mut reverb = BuiltinEffect::new(EffectKind::Reverb, 48000, 2);
        reverb.set_parameter("mode", 1.0).unwrap();
        let ir = AudioBuffer::constant(AudioBufferDesc::new(48000, 1, 64), 0.1).unwrap();
        reverb.as_reverb_mut().unwrap().load_impulse_response(&ir).unwrap();
        chain.push(Owned::new(&gc_handle(), reverb)).unwrap();
        chain.push(owned(EffectKind::Volume)).unwrap();
        assert_eq!(chain.latency_frames(), 128);

        chain.get_mut(0).unwrap().set_enabled(false);
        assert_eq!(chain.latency_frames(), 0);
    }
}
