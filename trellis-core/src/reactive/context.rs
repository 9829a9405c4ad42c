//! Reactive Context
//!
//! The context stack records which effect is running right now.
//! This enables automatic dependency tracking: when a slot is read, the
//! runtime registers the current computation as a subscriber.
//!
//! # Implementation
//!
//! Each runtime owns one stack of frames. Running an effect pushes an
//! `Effect` frame; [`Runtime::untracked`](crate::Runtime::untracked) pushes a
//! `Paused` frame. The top frame decides whether reads are tracked. Frames
//! are popped by a guard, so the stack stays balanced even when a body
//! panics.

use std::cell::RefCell;
use std::rc::Rc;

use super::effect::EffectCore;
use super::EffectId;

/// One level of the context stack.
pub(crate) enum Frame {
    /// An effect is running and collecting dependencies.
    Effect(Rc<EffectCore>),
    /// Tracking is suspended until this frame is popped.
    Paused,
}

impl Frame {
    fn effect_id(&self) -> Option<EffectId> {
        match self {
            Frame::Effect(effect) => Some(effect.id()),
            Frame::Paused => None,
        }
    }
}

/// The per-runtime context stack.
#[derive(Default)]
pub(crate) struct ContextStack {
    frames: RefCell<Vec<Frame>>,
}

impl ContextStack {
    /// Push an effect frame. The frame is popped when the guard drops.
    pub(crate) fn enter(&self, effect: Rc<EffectCore>) -> ContextGuard<'_> {
        let expected = Some(effect.id());
        self.frames.borrow_mut().push(Frame::Effect(effect));
        ContextGuard {
            stack: self,
            expected,
        }
    }

    /// Push a paused frame, disabling tracking until the guard drops.
    pub(crate) fn pause(&self) -> ContextGuard<'_> {
        self.frames.borrow_mut().push(Frame::Paused);
        ContextGuard {
            stack: self,
            expected: None,
        }
    }

    /// The effect that reads should be attributed to, if tracking is on.
    pub(crate) fn current(&self) -> Option<Rc<EffectCore>> {
        match self.frames.borrow().last() {
            Some(Frame::Effect(effect)) => Some(effect.clone()),
            _ => None,
        }
    }

    /// The innermost running effect, even while tracking is paused.
    pub(crate) fn active_effect_id(&self) -> Option<EffectId> {
        self.frames.borrow().iter().rev().find_map(Frame::effect_id)
    }

    /// Whether the effect is anywhere on the stack.
    pub(crate) fn contains(&self, id: EffectId) -> bool {
        self.frames
            .borrow()
            .iter()
            .any(|frame| frame.effect_id() == Some(id))
    }

    /// Whether reads are currently tracked.
    pub(crate) fn is_tracking(&self) -> bool {
        matches!(self.frames.borrow().last(), Some(Frame::Effect(_)))
    }

    #[cfg(test)]
    pub(crate) fn depth(&self) -> usize {
        self.frames.borrow().len()
    }
}

/// Pops its frame on drop, including during unwinding.
pub(crate) struct ContextGuard<'a> {
    stack: &'a ContextStack,
    expected: Option<EffectId>,
}

impl Drop for ContextGuard<'_> {
    fn drop(&mut self) {
        let popped = self.stack.frames.borrow_mut().pop();

        // Frames must pop in LIFO order.
        if let Some(frame) = &popped {
            debug_assert_eq!(
                frame.effect_id(),
                self.expected,
                "context stack out of order: expected {:?}, popped {:?}",
                self.expected,
                frame.effect_id()
            );
        }

        // The popped effect may be the last strong handle; drop it only
        // after the borrow above is released.
        drop(popped);
    }
}

#[cfg(test)]
mod tests {
    use crate::Runtime;

    #[test]
    fn context_tracks_effect() {
        let rt = Runtime::new();
        let stack = &rt.inner.context;
        assert!(!stack.is_tracking());

        let effect = rt.effect_with(|| (), crate::EffectOptions::new().lazy(true));
        {
            let _ctx = stack.enter(effect.core.clone());
            assert!(stack.is_tracking());
            assert_eq!(stack.active_effect_id(), Some(effect.id()));
            assert!(stack.contains(effect.id()));
        }

        // Empty again once the guard is gone.
        assert!(!stack.is_tracking());
        assert_eq!(stack.depth(), 0);
    }

    #[test]
    fn paused_frame_hides_but_keeps_active_effect() {
        let rt = Runtime::new();
        let stack = &rt.inner.context;
        let effect = rt.effect_with(|| (), crate::EffectOptions::new().lazy(true));

        let _outer = stack.enter(effect.core.clone());
        {
            let _paused = stack.pause();
            assert!(stack.current().is_none());
            assert_eq!(stack.active_effect_id(), Some(effect.id()));
        }
        assert!(stack.current().is_some());
    }

    #[test]
    fn nested_contexts() {
        let rt = Runtime::new();
        let stack = &rt.inner.context;
        let outer = rt.effect_with(|| (), crate::EffectOptions::new().lazy(true));
        let inner = rt.effect_with(|| (), crate::EffectOptions::new().lazy(true));

        {
            let _ctx1 = stack.enter(outer.core.clone());
            {
                let _ctx2 = stack.enter(inner.core.clone());
                assert_eq!(stack.active_effect_id(), Some(inner.id()));
            }

            // The outer effect is back on top.
            assert_eq!(stack.active_effect_id(), Some(outer.id()));
        }

        assert!(stack.active_effect_id().is_none());
    }
}
