//! Shared storage core behind every vessel variant.
//!
//! A [`DerivativeStash`] owns the offset table, the flat value/derivative
//! buffer, the per-pass DOF map and the force accumulator. Vessel variants
//! differ only in how many components they store and in how they talk to
//! their provider; the bookkeeping lives here.
//!
//! # Step protocol
//!
//! ```text
//! resize ──► prepare ──► store(i) × N ──► read / chain rule / add_forces ──► apply_force
//!   ▲                                                                        │
//!   └──────── topology change ◄──────── next step: prepare ◄─────────────────┘
//! ```

#[cfg(feature = "parallel")]
use std::ops::Range;

use tracing::{debug, trace, warn};

use crate::accumulator::ForceAccumulator;
use crate::buffer::FlatDerivativeBuffer;
use crate::config::VesselConfig;
use crate::error::VesselError;
use crate::offsets::OffsetTable;
use crate::provider::EntityTopology;
use crate::sink::DerivativeSink;

/// Where a vessel is in its per-step protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepPhase {
    /// Never resized; nothing may be stored or read.
    Unsized,
    /// Forces cleared, no entity evaluated yet.
    Prepared,
    /// At least one entity stored in this pass.
    Evaluating,
    /// At least one force contribution added in this pass.
    Forced,
}

/// Flat derivative storage plus force accumulation for one vessel.
#[derive(Debug, Clone)]
pub struct DerivativeStash {
    config: VesselConfig,
    offsets: OffsetTable,
    buffer: FlatDerivativeBuffer,
    /// Global DOF index of every local DOF, recorded when the entity is stored.
    dof_map: Vec<usize>,
    evaluated: Vec<bool>,
    forces: ForceAccumulator,
    total_dofs: usize,
    phase: StepPhase,
    /// One dense row per rayon worker for parallel projection, kept across steps.
    #[cfg(feature = "parallel")]
    par_scratch: Vec<f64>,
}

impl DerivativeStash {
    /// Create an unsized stash for entities with `components` value components.
    ///
    /// # Panics
    ///
    /// Panics if `config` fails [`VesselConfig::validate`].
    #[must_use]
    #[track_caller]
    pub fn new(components: usize, config: VesselConfig) -> Self {
        if let Err(err) = config.validate() {
            err.violated();
        }
        Self {
            config,
            offsets: OffsetTable::new(components),
            buffer: FlatDerivativeBuffer::new(),
            dof_map: Vec::new(),
            evaluated: Vec::new(),
            forces: ForceAccumulator::default(),
            total_dofs: 0,
            phase: StepPhase::Unsized,
            #[cfg(feature = "parallel")]
            par_scratch: Vec::new(),
        }
    }

    /// Configuration in use.
    #[must_use]
    pub const fn config(&self) -> &VesselConfig {
        &self.config
    }

    /// Diagnostic label.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.config.label
    }

    /// Current step phase.
    #[must_use]
    pub const fn phase(&self) -> StepPhase {
        self.phase
    }

    /// The offset table built by the last resize.
    #[must_use]
    pub const fn offsets(&self) -> &OffsetTable {
        &self.offsets
    }

    /// The flat value/derivative buffer.
    #[must_use]
    pub const fn buffer(&self) -> &FlatDerivativeBuffer {
        &self.buffer
    }

    /// The force accumulator.
    #[must_use]
    pub const fn forces(&self) -> &ForceAccumulator {
        &self.forces
    }

    /// Number of entities after the last resize.
    #[must_use]
    pub fn num_entities(&self) -> usize {
        self.offsets.num_entities()
    }

    /// Size of the global DOF space after the last resize.
    #[must_use]
    pub const fn total_dofs(&self) -> usize {
        self.total_dofs
    }

    /// Rebuild offsets and storage for the provider's current topology.
    ///
    /// Leaves the stash prepared: buffer zeroed, forces cleared, no entity
    /// evaluated. Existing allocations are reused where possible.
    pub fn resize<T: EntityTopology + ?Sized>(&mut self, topology: &T) {
        let n = topology.entity_count();
        self.offsets
            .resize_from((0..n).map(|i| topology.derivative_count(i)));
        self.buffer.resize(self.offsets.total_len());

        self.dof_map.clear();
        self.dof_map.resize(self.offsets.total_derivatives(), 0);
        self.evaluated.clear();
        self.evaluated.resize(n, false);

        self.total_dofs = topology.total_derivative_count();
        self.forces.resize(self.total_dofs);
        self.phase = StepPhase::Prepared;

        debug!(
            label = %self.config.label,
            entities = n,
            buffer_len = self.offsets.total_len(),
            total_dofs = self.total_dofs,
            "resized derivative stash"
        );
    }

    /// Compare the provider's topology with the last resize.
    ///
    /// Returns [`VesselError::StaleTopology`] describing the first difference
    /// found, or [`VesselError::NotResized`] if the stash was never resized.
    pub fn check_topology<T: EntityTopology + ?Sized>(&self, topology: &T) -> crate::Result<()> {
        if self.phase == StepPhase::Unsized {
            return Err(VesselError::not_resized(self.label()));
        }

        let n = topology.entity_count();
        if n != self.num_entities() {
            return Err(VesselError::stale_topology(format!(
                "entity count changed from {} to {n}",
                self.num_entities()
            )));
        }

        let total = topology.total_derivative_count();
        if total != self.total_dofs {
            return Err(VesselError::stale_topology(format!(
                "total DOF count changed from {} to {total}",
                self.total_dofs
            )));
        }

        for (i, stored) in self.offsets.derivative_counts().enumerate() {
            let current = topology.derivative_count(i);
            if current != stored {
                return Err(VesselError::stale_topology(format!(
                    "entity {i} derivative count changed from {stored} to {current}"
                )));
            }
        }

        Ok(())
    }

    /// Resize only if the provider's topology differs from the last resize.
    ///
    /// Returns true if a resize happened.
    pub fn resize_if_needed<T: EntityTopology + ?Sized>(&mut self, topology: &T) -> bool {
        match self.check_topology(topology) {
            Ok(()) => false,
            Err(err) => {
                warn!(label = %self.config.label, %err, "topology changed, resizing");
                self.resize(topology);
                true
            }
        }
    }

    /// Start a new step: clear forces and evaluation flags.
    ///
    /// # Panics
    ///
    /// Panics if the stash was never resized.
    #[track_caller]
    pub fn prepare(&mut self) {
        self.check_resized();
        self.forces.clear();
        self.evaluated.fill(false);
        if self.config.zero_fill_on_prepare {
            self.buffer.zero();
        }
        self.phase = StepPhase::Prepared;
        trace!(label = %self.config.label, "prepared");
    }

    /// Store the value and derivatives of one entity.
    ///
    /// `value` holds one entry per component; `derivative(local, component)`
    /// supplies each derivative. Every slot of the entity's block is written
    /// exactly once, and its global DOF indices are recorded for the chain
    /// rule.
    ///
    /// # Panics
    ///
    /// Panics if `entity` is out of range, if the provider's derivative count
    /// for `entity` no longer matches the last resize, or if it maps a DOF
    /// outside the global DOF space.
    #[track_caller]
    pub fn store<T, V, D>(&mut self, topology: &T, entity: usize, value: V, derivative: D)
    where
        T: EntityTopology + ?Sized,
        V: AsRef<[f64]>,
        D: Fn(usize, usize) -> f64,
    {
        self.check_entity(entity);
        let block = self.offsets.block(entity);
        let dofs = self.offsets.dof_block(entity);
        fill_entity(
            topology,
            entity,
            self.total_dofs,
            value.as_ref(),
            self.buffer.block_mut(block),
            &mut self.dof_map[dofs],
            derivative,
        );
        self.evaluated[entity] = true;
        self.mark_evaluating();
    }

    /// Store every entity in index order.
    ///
    /// `derivative(entity, local, component)` supplies each derivative.
    #[track_caller]
    pub fn store_all<T, FV, V, D>(&mut self, topology: &T, value: FV, derivative: D)
    where
        T: EntityTopology + ?Sized,
        FV: Fn(usize) -> V,
        V: AsRef<[f64]>,
        D: Fn(usize, usize, usize) -> f64,
    {
        for entity in 0..self.num_entities() {
            self.store(topology, entity, value(entity), |d, c| {
                derivative(entity, d, c)
            });
        }
    }

    /// Store every entity on the rayon pool.
    ///
    /// Entity blocks are disjoint, so the buffer and the DOF map are split
    /// recursively at entity boundaries and each half is filled on its own
    /// worker. Ranges of at most `parallel_grain` entities run sequentially.
    #[cfg(feature = "parallel")]
    #[track_caller]
    pub fn store_all_par<T, FV, V, D>(&mut self, topology: &T, value: FV, derivative: D)
    where
        T: EntityTopology + Sync + ?Sized,
        FV: Fn(usize) -> V + Sync,
        V: AsRef<[f64]>,
        D: Fn(usize, usize, usize) -> f64 + Sync,
    {
        self.check_resized();
        let job = ParallelFill {
            topology,
            offsets: &self.offsets,
            total_dofs: self.total_dofs,
            grain: self.config.parallel_grain,
            value: &value,
            derivative: &derivative,
        };
        job.run(
            0..self.offsets.num_entities(),
            self.buffer.as_mut_slice(),
            &mut self.dof_map,
        );
        self.evaluated.fill(true);
        self.mark_evaluating();
    }

    /// Read the stored value of `entity` into `out`, one entry per component.
    ///
    /// # Panics
    ///
    /// Panics if `entity` is out of range, was not stored in this pass, or if
    /// `out` does not hold exactly one entry per component.
    #[track_caller]
    pub fn read_value(&self, entity: usize, out: &mut [f64]) {
        self.check_readable(entity);
        check_components(&self.offsets, out.len());

        let stride = self.offsets.stride(entity);
        let mut pos = self.offsets.start(entity);
        for slot in out.iter_mut() {
            *slot = self.buffer.read_at(pos);
            pos += stride;
        }
        debug_assert_eq!(pos, self.offsets.end(entity));
    }

    /// Stored derivatives of one component of `entity`, in local DOF order.
    #[must_use]
    #[track_caller]
    pub fn derivatives(&self, entity: usize, component: usize) -> &[f64] {
        self.check_readable(entity);
        let first = self.offsets.component_offset(entity, component) + 1;
        self.buffer
            .block(first..first + self.offsets.derivative_count(entity))
    }

    /// Global DOF indices recorded for `entity` in this pass.
    #[must_use]
    #[track_caller]
    pub fn dof_indices(&self, entity: usize) -> &[usize] {
        self.check_readable(entity);
        &self.dof_map[self.offsets.dof_block(entity)]
    }

    /// Whether `entity` was stored since the last prepare.
    #[must_use]
    pub fn is_evaluated(&self, entity: usize) -> bool {
        self.evaluated.get(entity).copied().unwrap_or(false)
    }

    /// Reverse-mode chain rule for one entity.
    ///
    /// For every local DOF `d` adds `Σ_c df[c] · ∂x_c/∂q_d` to `sink` at
    /// `output_slot * total_dofs + dof_map(entity, d)`.
    ///
    /// # Panics
    ///
    /// Panics if `entity` is out of range, was not stored in this pass, or if
    /// `df` does not hold exactly one entry per component.
    #[track_caller]
    pub fn chain_rule<S>(&self, entity: usize, output_slot: usize, df: &[f64], sink: &mut S)
    where
        S: DerivativeSink + ?Sized,
    {
        self.check_readable(entity);
        contract(
            &self.offsets,
            &self.buffer,
            &self.dof_map,
            output_slot * self.total_dofs,
            entity,
            df,
            sink,
        );
    }

    /// Run the chain rule for every entity with per-entity forces `df(entity)`.
    #[track_caller]
    pub fn chain_rule_all<S, FD, V>(&self, output_slot: usize, df: FD, sink: &mut S)
    where
        S: DerivativeSink + ?Sized,
        FD: Fn(usize) -> V,
        V: AsRef<[f64]>,
    {
        for entity in 0..self.num_entities() {
            self.chain_rule(entity, output_slot, df(entity).as_ref(), sink);
        }
    }

    /// Project per-entity forces onto the global DOF and accumulate them.
    ///
    /// Equivalent to running the chain rule for every entity into a zeroed
    /// vector and passing it to [`add_forces`](Self::add_forces), without the
    /// intermediate vector. Over an empty entity set this is a no-op and the
    /// stash is not marked forced.
    #[track_caller]
    pub fn project_into_forces<FD, V>(&mut self, df: FD)
    where
        FD: Fn(usize) -> V,
        V: AsRef<[f64]>,
    {
        self.check_resized();
        if self.num_entities() == 0 {
            return;
        }
        for entity in 0..self.num_entities() {
            self.check_readable(entity);
            contract(
                &self.offsets,
                &self.buffer,
                &self.dof_map,
                0,
                entity,
                df(entity).as_ref(),
                &mut self.forces,
            );
        }
        self.forces.mark_forced();
        self.phase = StepPhase::Forced;
    }

    /// Parallel [`project_into_forces`](Self::project_into_forces).
    ///
    /// Entities sharing DOF would race on a shared accumulator, so entities
    /// are split into at most one contiguous range per rayon worker, each
    /// range contracts into its own dense scratch row, and the rows are
    /// summed into the accumulator afterwards. The scratch rows are kept
    /// across steps.
    #[cfg(feature = "parallel")]
    #[track_caller]
    pub fn project_into_forces_par<FD, V>(&mut self, df: FD)
    where
        FD: Fn(usize) -> V + Sync,
        V: AsRef<[f64]>,
    {
        use rayon::prelude::*;

        self.check_resized();
        let n = self.num_entities();
        if n == 0 {
            return;
        }
        for entity in 0..n {
            self.check_readable(entity);
        }

        let total = self.total_dofs;
        if total == 0 {
            // No DOF to write; only the length checks remain
            self.project_into_forces(df);
            return;
        }

        let rows = n
            .div_ceil(self.config.parallel_grain)
            .min(rayon::current_num_threads())
            .max(1);
        let per_row = n.div_ceil(rows);
        self.par_scratch.resize(rows * total, 0.0);

        let (offsets, buffer, dof_map) = (&self.offsets, &self.buffer, &self.dof_map);
        let df = &df;
        self.par_scratch
            .par_chunks_mut(total)
            .enumerate()
            .for_each(|(row, acc)| {
                acc.fill(0.0);
                let end = ((row + 1) * per_row).min(n);
                for entity in row * per_row..end {
                    contract(offsets, buffer, dof_map, 0, entity, df(entity).as_ref(), acc);
                }
            });

        for row in self.par_scratch.chunks_exact(total) {
            self.forces.add_forces(row);
        }
        self.phase = StepPhase::Forced;
    }

    /// Add a full-length force vector from a downstream consumer.
    ///
    /// # Panics
    ///
    /// Panics if `forces` does not cover exactly [`total_dofs`](Self::total_dofs).
    #[track_caller]
    pub fn add_forces(&mut self, forces: &[f64]) {
        self.check_resized();
        self.forces.add_forces(forces);
        self.phase = StepPhase::Forced;
    }

    /// Copy the accumulated forces into `out` if any were added this step.
    ///
    /// # Panics
    ///
    /// Panics if `out` does not cover exactly [`total_dofs`](Self::total_dofs).
    #[track_caller]
    pub fn apply_force(&self, out: &mut [f64]) -> bool {
        self.forces.apply_force(out)
    }

    fn mark_evaluating(&mut self) {
        if self.phase == StepPhase::Prepared {
            self.phase = StepPhase::Evaluating;
        }
    }

    #[track_caller]
    fn check_resized(&self) {
        if self.phase == StepPhase::Unsized {
            VesselError::not_resized(self.label()).violated();
        }
    }

    #[track_caller]
    fn check_entity(&self, entity: usize) {
        self.check_resized();
        if entity >= self.num_entities() {
            VesselError::entity_out_of_range(entity, self.num_entities()).violated();
        }
    }

    #[track_caller]
    fn check_readable(&self, entity: usize) {
        self.check_entity(entity);
        if self.config.check_evaluated && !self.evaluated[entity] {
            VesselError::not_evaluated(entity).violated();
        }
    }
}

/// Write one entity's block and DOF map slice.
#[track_caller]
fn fill_entity<T, D>(
    topology: &T,
    entity: usize,
    total_dofs: usize,
    value: &[f64],
    block: &mut [f64],
    dofs: &mut [usize],
    derivative: D,
) where
    T: EntityTopology + ?Sized,
    D: Fn(usize, usize) -> f64,
{
    let nder = dofs.len();
    let reported = topology.derivative_count(entity);
    if reported != nder {
        VesselError::stale_topology(format!(
            "entity {entity} reports {reported} derivatives but was sized for {nder}"
        ))
        .violated();
    }
    if value.len() * (nder + 1) != block.len() {
        VesselError::length_mismatch(block.len() / (nder + 1), value.len()).violated();
    }

    for (c, sub) in block.chunks_exact_mut(nder + 1).enumerate() {
        sub[0] = value[c];
        for (d, slot) in sub[1..].iter_mut().enumerate() {
            *slot = derivative(d, c);
        }
    }

    for (d, slot) in dofs.iter_mut().enumerate() {
        let index = topology.global_dof_index(entity, d);
        if index >= total_dofs {
            VesselError::dof_out_of_range(index, total_dofs).violated();
        }
        *slot = index;
    }
}

#[track_caller]
fn check_components(offsets: &OffsetTable, len: usize) {
    if len != offsets.components() {
        VesselError::length_mismatch(offsets.components(), len).violated();
    }
}

/// The chain-rule contraction for one entity.
#[inline]
#[track_caller]
fn contract<S>(
    offsets: &OffsetTable,
    buffer: &FlatDerivativeBuffer,
    dof_map: &[usize],
    base: usize,
    entity: usize,
    df: &[f64],
    sink: &mut S,
) where
    S: DerivativeSink + ?Sized,
{
    check_components(offsets, df.len());
    let nder = offsets.derivative_count(entity);
    let stride = nder + 1;
    let start = offsets.start(entity);
    let dofs = &dof_map[offsets.dof_block(entity)];

    for (ider, &dof) in dofs.iter().enumerate() {
        let mut sum = 0.0;
        for (jcomp, f) in df.iter().enumerate() {
            sum += f * buffer.read_at(start + jcomp * stride + 1 + ider);
        }
        sink.add_element_derivative(base + dof, sum);
    }
}

/// Recursive splitter for [`DerivativeStash::store_all_par`].
#[cfg(feature = "parallel")]
struct ParallelFill<'a, T: ?Sized, FV, D> {
    topology: &'a T,
    offsets: &'a OffsetTable,
    total_dofs: usize,
    grain: usize,
    value: &'a FV,
    derivative: &'a D,
}

#[cfg(feature = "parallel")]
impl<T, FV, V, D> ParallelFill<'_, T, FV, D>
where
    T: EntityTopology + Sync + ?Sized,
    FV: Fn(usize) -> V + Sync,
    V: AsRef<[f64]>,
    D: Fn(usize, usize, usize) -> f64 + Sync,
{
    /// Fill `entities`, whose blocks are exactly `block` and `dofs`.
    fn run(&self, entities: Range<usize>, block: &mut [f64], dofs: &mut [usize]) {
        if entities.len() <= self.grain {
            let base = self.offsets.start(entities.start);
            let dof_base = self.offsets.dof_start(entities.start);
            for entity in entities {
                let b = shift(self.offsets.block(entity), base);
                let d = shift(self.offsets.dof_block(entity), dof_base);
                fill_entity(
                    self.topology,
                    entity,
                    self.total_dofs,
                    (self.value)(entity).as_ref(),
                    &mut block[b],
                    &mut dofs[d],
                    |local, c| (self.derivative)(entity, local, c),
                );
            }
            return;
        }

        let mid = entities.start + entities.len() / 2;
        let split = self.offsets.start(mid) - self.offsets.start(entities.start);
        let dof_split = self.offsets.dof_start(mid) - self.offsets.dof_start(entities.start);
        let (left, right) = block.split_at_mut(split);
        let (left_dofs, right_dofs) = dofs.split_at_mut(dof_split);

        rayon::join(
            || self.run(entities.start..mid, left, left_dofs),
            || self.run(mid..entities.end, right, right_dofs),
        );
    }
}

#[cfg(feature = "parallel")]
fn shift(range: Range<usize>, base: usize) -> Range<usize> {
    range.start - base..range.end - base
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;

    /// Two entities with hand-written layouts.
    struct Fixture {
        counts: Vec<usize>,
        total: usize,
    }

    impl EntityTopology for Fixture {
        fn entity_count(&self) -> usize {
            self.counts.len()
        }

        fn derivative_count(&self, entity: usize) -> usize {
            self.counts[entity]
        }

        fn total_derivative_count(&self) -> usize {
            self.total
        }

        fn global_dof_index(&self, entity: usize, local: usize) -> usize {
            (entity + local) % self.total
        }
    }

    fn fixture() -> Fixture {
        Fixture {
            counts: vec![2, 1],
            total: 4,
        }
    }

    #[test]
    fn test_resize_leaves_stash_prepared() {
        let mut stash = DerivativeStash::new(3, VesselConfig::default());
        assert_eq!(stash.phase(), StepPhase::Unsized);

        stash.resize(&fixture());
        assert_eq!(stash.phase(), StepPhase::Prepared);
        assert_eq!(stash.buffer().len(), 15);
        assert_eq!(stash.forces().len(), 4);
    }

    #[test]
    fn test_store_writes_block_layout() {
        let topo = fixture();
        let mut stash = DerivativeStash::new(3, VesselConfig::default());
        stash.resize(&topo);

        stash.store(&topo, 0, [1.0, 2.0, 3.0], |d, c| (10 * c + d) as f64);

        assert_eq!(
            stash.buffer().block(0..9),
            &[1.0, 0.0, 1.0, 2.0, 10.0, 11.0, 3.0, 20.0, 21.0]
        );
        assert_eq!(stash.dof_indices(0), &[0, 1]);
        assert_eq!(stash.derivatives(0, 2), &[20.0, 21.0]);
        assert_eq!(stash.phase(), StepPhase::Evaluating);
    }

    #[test]
    fn test_chain_rule_with_output_slot() {
        let topo = fixture();
        let mut stash = DerivativeStash::new(3, VesselConfig::default());
        stash.resize(&topo);
        stash.store(&topo, 1, [0.0; 3], |_, c| (c + 1) as f64);

        // Entity 1 has one DOF mapped to global index 1
        let mut sink = vec![0.0; 8];
        stash.chain_rule(1, 1, &[1.0, 1.0, 1.0], &mut sink);

        assert_eq!(sink[4 + 1], 6.0);
        assert_eq!(sink.iter().sum::<f64>(), 6.0);
    }

    #[test]
    fn test_check_topology() {
        let mut topo = fixture();
        let mut stash = DerivativeStash::new(3, VesselConfig::default());
        assert!(matches!(
            stash.check_topology(&topo),
            Err(VesselError::NotResized { .. })
        ));

        stash.resize(&topo);
        assert!(stash.check_topology(&topo).is_ok());

        topo.counts[1] = 3;
        let err = stash.check_topology(&topo).unwrap_err();
        assert!(err.to_string().contains("entity 1 derivative count"));

        assert!(stash.resize_if_needed(&topo));
        assert!(!stash.resize_if_needed(&topo));
        assert_eq!(stash.buffer().len(), 9 + 12);
    }

    #[test]
    fn test_prepare_clears_evaluated() {
        let topo = fixture();
        let mut stash = DerivativeStash::new(3, VesselConfig::default());
        stash.resize(&topo);
        stash.store(&topo, 0, [0.0; 3], |_, _| 0.0);
        assert!(stash.is_evaluated(0));

        stash.prepare();
        assert!(!stash.is_evaluated(0));
        assert_eq!(stash.phase(), StepPhase::Prepared);
    }

    #[test]
    fn test_zero_fill_on_prepare() {
        let topo = fixture();
        let mut stash = DerivativeStash::new(3, VesselConfig::strict());
        stash.resize(&topo);
        stash.store(&topo, 0, [5.0; 3], |_, _| 1.0);

        stash.prepare();
        assert!(stash.buffer().as_slice().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_project_into_forces_marks_forced() {
        let topo = fixture();
        let mut stash = DerivativeStash::new(3, VesselConfig::default());
        stash.resize(&topo);
        stash.store_all(&topo, |_| [0.0; 3], |_, _, c| if c == 0 { 1.0 } else { 0.0 });

        stash.project_into_forces(|_| [2.0, 0.0, 0.0]);
        assert_eq!(stash.phase(), StepPhase::Forced);

        let mut out = [0.0; 4];
        assert!(stash.apply_force(&mut out));
        // Entity 0 -> DOF 0, 1; entity 1 -> DOF 1
        assert_eq!(out, [2.0, 4.0, 0.0, 0.0]);
    }

    #[test]
    #[should_panic(expected = "used before resize")]
    fn test_prepare_before_resize_panics() {
        let mut stash = DerivativeStash::new(3, VesselConfig::default());
        stash.prepare();
    }

    #[test]
    #[should_panic(expected = "entity index 2 out of range")]
    fn test_store_out_of_range_panics() {
        let topo = fixture();
        let mut stash = DerivativeStash::new(3, VesselConfig::default());
        stash.resize(&topo);
        stash.store(&topo, 2, [0.0; 3], |_, _| 0.0);
    }

    #[test]
    #[should_panic(expected = "read before it was evaluated")]
    fn test_read_before_store_panics() {
        let topo = fixture();
        let mut stash = DerivativeStash::new(3, VesselConfig::default());
        stash.resize(&topo);
        let mut out = [0.0; 3];
        stash.read_value(1, &mut out);
    }

    #[test]
    #[should_panic(expected = "stale topology")]
    fn test_store_after_missed_resize_panics() {
        let mut topo = fixture();
        let mut stash = DerivativeStash::new(3, VesselConfig::default());
        stash.resize(&topo);
        topo.counts[0] = 5;
        stash.store(&topo, 0, [0.0; 3], |_, _| 0.0);
    }

    #[test]
    #[should_panic(expected = "length mismatch: expected 3, got 4")]
    fn test_chain_rule_rejects_long_force() {
        let topo = fixture();
        let mut stash = DerivativeStash::new(3, VesselConfig::default());
        stash.resize(&topo);
        stash.store_all(&topo, |_| [0.0; 3], |i, _, _| if i == 1 { 7.0 } else { 0.0 });

        let mut sink = vec![0.0; 4];
        stash.chain_rule(0, 0, &[0.0, 0.0, 0.0, 1.0], &mut sink);
    }

    #[test]
    #[should_panic(expected = "length mismatch: expected 3, got 4")]
    fn test_read_value_rejects_long_output() {
        let topo = fixture();
        let mut stash = DerivativeStash::new(3, VesselConfig::default());
        stash.resize(&topo);
        stash.store_all(&topo, |i| [1.0, 2.0, 3.0 + i as f64], |_, _, _| 0.0);

        let mut out = [0.0; 4];
        stash.read_value(0, &mut out);
    }

    #[test]
    #[should_panic(expected = "length mismatch: expected 3, got 2")]
    fn test_projection_rejects_short_force() {
        let topo = fixture();
        let mut stash = DerivativeStash::new(3, VesselConfig::default());
        stash.resize(&topo);
        stash.store_all(&topo, |_| [0.0; 3], |_, _, _| 1.0);

        stash.project_into_forces(|_| [1.0, 1.0]);
    }

    #[test]
    #[should_panic(expected = "used before resize")]
    fn test_add_forces_before_resize_panics() {
        let mut stash = DerivativeStash::new(3, VesselConfig::default());
        stash.add_forces(&[]);
    }

    #[test]
    #[should_panic(expected = "used before resize")]
    fn test_projection_before_resize_panics() {
        let mut stash = DerivativeStash::new(3, VesselConfig::default());
        stash.project_into_forces(|_| [0.0; 3]);
    }

    #[test]
    #[should_panic(expected = "invalid configuration: parallel_grain must be at least 1")]
    fn test_invalid_config_rejected_at_construction() {
        let _ = DerivativeStash::new(3, VesselConfig::default().with_parallel_grain(0));
    }

    #[test]
    fn test_projection_over_no_entities_is_noop() {
        let topo = Fixture {
            counts: Vec::new(),
            total: 2,
        };
        let mut stash = DerivativeStash::new(3, VesselConfig::default());
        stash.resize(&topo);
        stash.prepare();

        stash.project_into_forces(|_| [1.0; 3]);
        assert_eq!(stash.phase(), StepPhase::Prepared);

        let mut out = [5.0; 2];
        assert!(!stash.apply_force(&mut out));
        assert_eq!(out, [5.0; 2]);
    }

    #[cfg(feature = "parallel")]
    #[test]
    #[should_panic(expected = "length mismatch: expected 3, got 4")]
    fn test_parallel_projection_rejects_long_force() {
        let topo = fixture();
        let mut stash = DerivativeStash::new(3, VesselConfig::default().with_parallel_grain(1));
        stash.resize(&topo);
        stash.store_all(&topo, |_| [0.0; 3], |_, _, _| 1.0);

        stash.project_into_forces_par(|_| [1.0; 4]);
    }

    #[cfg(feature = "parallel")]
    #[test]
    fn test_parallel_projection_reuses_scratch() {
        let topo = Fixture {
            counts: (0..50).map(|i| i % 3).collect(),
            total: 7,
        };
        let config = VesselConfig::default().with_parallel_grain(4);
        let mut seq = DerivativeStash::new(3, config.clone());
        let mut par = DerivativeStash::new(3, config);
        seq.resize(&topo);
        par.resize(&topo);

        let mut capacity = None;
        for step in 0..3 {
            let scale = step as f64 + 1.0;
            for stash in [&mut seq, &mut par] {
                stash.prepare();
                stash.store_all(&topo, |_| [0.0; 3], |i, d, c| (i + d + c) as f64 * scale);
            }
            seq.project_into_forces(|i| [1.0, -0.5, i as f64]);
            par.project_into_forces_par(|i| [1.0, -0.5, i as f64]);

            let (mut a, mut b) = ([0.0; 7], [0.0; 7]);
            assert!(seq.apply_force(&mut a));
            assert!(par.apply_force(&mut b));
            for (x, y) in a.iter().zip(&b) {
                approx::assert_relative_eq!(*x, *y, epsilon = 1e-9, max_relative = 1e-12);
            }

            let cap = par.par_scratch.capacity();
            assert_eq!(*capacity.get_or_insert(cap), cap);
        }
    }

    #[cfg(feature = "parallel")]
    #[test]
    fn test_parallel_store_matches_sequential() {
        let topo = Fixture {
            counts: (0..37).map(|i| i % 4).collect(),
            total: 11,
        };
        let config = VesselConfig::default().with_parallel_grain(3);
        let value = |i: usize| [i as f64, -(i as f64), 0.5];
        let deriv = |i: usize, d: usize, c: usize| (i * 100 + d * 10 + c) as f64;

        let mut seq = DerivativeStash::new(3, config.clone());
        seq.resize(&topo);
        seq.store_all(&topo, value, deriv);

        let mut par = DerivativeStash::new(3, config);
        par.resize(&topo);
        par.store_all_par(&topo, value, deriv);

        assert_eq!(seq.buffer(), par.buffer());
        for i in 0..37 {
            assert_eq!(seq.dof_indices(i), par.dof_indices(i));
        }

        seq.project_into_forces(|i| [1.0, i as f64, 0.25]);
        par.project_into_forces_par(|i| [1.0, i as f64, 0.25]);
        for (a, b) in seq.forces().forces().iter().zip(par.forces().forces().iter()) {
            approx::assert_relative_eq!(*a, *b, epsilon = 1e-9);
        }
    }
}
