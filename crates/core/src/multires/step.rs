//! Recursive non-uniform time step
//!
//! Level `l` advances `refinement` times per step of level `l + 1`:
//!
//! ```text
//! substep(l):
//!     collide(l)
//!     store(l + 1)                       if l is not the top level
//!     refinement × substep(l - 1)        if l > 0
//!     stream(l), explode(l), coalesce(l) per fusion and level position
//! ```

use super::protocol::{CoalescenceMode, MultiResProtocol, StreamFusion};
use crate::core_types::BlockShape;
use crate::error::GridResult;
use crate::field::FieldValue;
use crate::scheduler::{Container, Skeleton, SkeletonOptions};
use num_traits::Float;
use tracing::debug;

/// Builder of the container sequence of one coarse time step
pub struct MultiResStep<'a, T, S: BlockShape> {
    protocol: MultiResProtocol<'a, T, S>,
    fusion: StreamFusion,
}

impl<'a, T: FieldValue + Float, S: BlockShape> MultiResStep<'a, T, S> {
    pub fn new(protocol: MultiResProtocol<'a, T, S>, fusion: StreamFusion) -> Self {
        Self { protocol, fusion }
    }

    pub fn protocol(&self) -> &MultiResProtocol<'a, T, S> {
        &self.protocol
    }

    pub fn fusion(&self) -> StreamFusion {
        self.fusion
    }

    /// Containers to run once before the first step: contributor counts for
    /// initial-store coalescence, nothing otherwise.
    pub fn setup(&self) -> GridResult<Vec<Container<'a>>> {
        if self.protocol.mode != CoalescenceMode::InitialStore {
            return Ok(Vec::new());
        }
        (1..self.protocol.grid.depth())
            .map(|level| self.protocol.sum_store(level))
            .collect()
    }

    /// Containers of one step of the top level, in program order.
    ///
    /// # Arguments
    /// * `collide` - Builds the collision container of a level
    pub fn containers<C>(&self, collide: C) -> GridResult<Vec<Container<'a>>>
    where
        C: Fn(usize) -> GridResult<Container<'a>>,
    {
        let mut out = Vec::new();
        let top = self.protocol.grid.depth() - 1;
        self.substep(top, &collide, &mut out)?;
        debug!(containers = out.len(), fusion = ?self.fusion, "multires step");
        Ok(out)
    }

    /// One step as a skeleton
    pub fn skeleton<C>(&self, name: &str, collide: C, options: SkeletonOptions) -> GridResult<Skeleton<'a>>
    where
        C: Fn(usize) -> GridResult<Container<'a>>,
    {
        Skeleton::sequence(name, self.containers(collide)?, options)
    }

    fn substep<C>(&self, level: usize, collide: &C, out: &mut Vec<Container<'a>>) -> GridResult<()>
    where
        C: Fn(usize) -> GridResult<Container<'a>>,
    {
        let top = self.protocol.grid.depth() - 1;
        out.push(collide(level)?);
        if level < top {
            out.push(self.protocol.store(level + 1)?);
        }
        if level > 0 {
            for _ in 0..self.protocol.grid.refinement() {
                self.substep(level - 1, collide, out)?;
            }
        }

        let p = &self.protocol;
        match self.fusion {
            StreamFusion::None => {
                out.push(p.stream(level)?);
                if level < top {
                    out.push(p.explode(level)?);
                }
                if level > 0 {
                    out.push(p.coalesce(level)?);
                }
            }
            StreamFusion::Explosion => {
                out.push(p.stream_fused_explosion(level)?);
                if level > 0 {
                    out.push(p.coalesce(level)?);
                }
            }
            StreamFusion::Coalescence => {
                out.push(p.stream_fused_coalescence(level)?);
                if level < top {
                    out.push(p.explode(level)?);
                }
            }
        }
        Ok(())
    }
}
