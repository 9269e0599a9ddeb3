//! Partial repacking of a stored field list.
//!
//! Contract state is one long field list laid out by a [`LayoutPlan`].  A
//! function usually touches only a few fields, so [`PartialRepack`] reads
//! just the needed ones and skips the rest in batches, and writes the
//! needed ones back while copying untouched bits verbatim.  Both passes
//! reproduce the split points of a full encode.
//!
//! Leaf indices are positions in the flattened leaf list of *all*
//! variables; only leaves from `var_offset` on are ever visited.

use cellabi_types::{Instr, Type, TypeRef, TypeSize};
use tracing::debug;

use crate::decoder::decode_parameter;
use crate::emitter::Emitter;
use crate::error::{CodegenError, CodegenResult};
use crate::layout::{LayoutPlan, Position};

/// What the pack pass holds on the stack for each unpacked fragment.
#[derive(Debug, Clone)]
enum Slot {
    /// Raw bits and references copied with `STSLICE`.
    Raw,
    /// A value of the given type, stored with typed stores.
    Value(TypeRef),
}

/// Precomputed plan for reading and rewriting a subset of variables.
#[derive(Debug, Clone)]
pub struct PartialRepack {
    offset: u32,
    used_refs: u32,
    var_offset: usize,
    var_types: Vec<TypeRef>,
    leaves: Vec<TypeRef>,
    /// Owning variable of each leaf of a needed variable.
    var_index: Vec<Option<usize>>,
    /// First index after `i` where the needed status changes or a new
    /// cell starts.
    to: Vec<usize>,
    start: usize,
    last: usize,
    needed_vars: usize,
}

impl PartialRepack {
    /// `var_types` is the whole stored list, laid out from `offset` bits
    /// and `used_refs` references; variables before `var_offset` are never
    /// touched.  `var_needed[v]` marks the variables to read or rewrite.
    pub fn new(
        offset: u32,
        used_refs: u32,
        var_offset: usize,
        var_types: Vec<TypeRef>,
        var_needed: Vec<bool>,
    ) -> CodegenResult<Self> {
        if var_needed.len() != var_types.len() {
            return Err(CodegenError::Internal(format!(
                "{} needed flags for {} variables",
                var_needed.len(),
                var_types.len()
            )));
        }
        if var_offset >= var_types.len() {
            return Err(CodegenError::Internal(format!(
                "variable offset {} out of {} variables",
                var_offset,
                var_types.len()
            )));
        }

        let mut leaves = Vec::new();
        let mut var_index = Vec::new();
        let mut start = 0;
        let mut last = None;
        let mut needed_vars = 0;
        for (v, ty) in var_types.iter().enumerate() {
            if v == var_offset {
                start = leaves.len();
            }
            let first = leaves.len();
            cellabi_types::unroll(&mut leaves, ty);
            let needed = var_needed[v];
            if needed && v < var_offset {
                return Err(CodegenError::Internal(format!(
                    "variable {v} lies before the repacked range"
                )));
            }
            if needed && leaves.len() == first {
                return Err(CodegenError::Unsupported(format!(
                    "`{}` has no fields to repack",
                    ty
                )));
            }
            var_index.resize(leaves.len(), needed.then_some(v));
            if needed {
                needed_vars += 1;
                last = Some(leaves.len() - 1);
            }
        }
        let last = last.ok_or_else(|| CodegenError::Internal("no variable is needed".into()))?;

        let mut repack = Self {
            offset,
            used_refs,
            var_offset,
            var_types,
            leaves,
            var_index,
            to: Vec::new(),
            start,
            last,
            needed_vars,
        };

        let plan = repack.create_position()?;
        let mut to: Vec<usize> = (1..=repack.leaves.len()).collect();
        for i in (0..=last).rev() {
            let boundary = i == last
                || plan.starts_new_cell(i + 1)
                || repack.is_needed(i) != repack.is_needed(i + 1);
            if !boundary {
                to[i] = to[i + 1];
            }
        }
        repack.to = to;

        debug!(
            needed = needed_vars,
            start,
            last,
            leaves = repack.leaves.len(),
            "planned partial repack"
        );
        Ok(repack)
    }

    /// Number of values [`PartialRepack::unpacked_data`] leaves behind.
    pub fn needed_vars(&self) -> usize {
        self.needed_vars
    }

    fn is_needed(&self, i: usize) -> bool {
        self.var_index.get(i).copied().flatten().is_some()
    }

    fn create_position(&self) -> CodegenResult<LayoutPlan> {
        let mut plan = LayoutPlan::new(self.offset, self.used_refs, &self.var_types)?;
        plan.skip_types(&self.var_types[..self.var_offset])?;
        Ok(plan)
    }

    fn size(&self, i: usize) -> TypeSize {
        TypeSize::of(&self.leaves[i])
    }

    /// Total footprint of leaves `i..j` when every one of them is fixed.
    fn fixed_size(&self, i: usize, j: usize) -> Option<(u32, u32)> {
        (i..j).try_fold((0, 0), |(bits, refs), k| {
            let size = self.size(k);
            size.fixed_size
                .then_some((bits + size.max_bits, refs + size.max_refs))
        })
    }

    /// Reference count of leaves `i..j` when it does not depend on values.
    fn fixed_refs(&self, i: usize, j: usize) -> Option<u32> {
        (i..j).try_fold(0, |refs, k| {
            let size = self.size(k);
            size.fixed_refs.then_some(refs + size.max_refs)
        })
    }

    fn skip_leaves(&self, plan: &mut LayoutPlan, begin: usize, end: usize) -> CodegenResult<()> {
        for leaf in &self.leaves[begin..end] {
            plan.skip_type(leaf)?;
        }
        Ok(())
    }

    // ══════════════════════════════════════════════════════════════════════════
    // Skipping
    // ══════════════════════════════════════════════════════════════════════════

    /// `s → s'`: drop leaves `begin..end` from the slice.  Runs of fixed
    /// leaves go in one `SSKIPFIRST`; anything else is loaded and dropped.
    fn skip_types(
        &self,
        e: &mut Emitter,
        plan: &mut LayoutPlan,
        begin: usize,
        end: usize,
    ) -> CodegenResult<()> {
        let mut drop_qty = 0;
        let mut i = begin;
        while i < end {
            if self.size(i).fixed_size {
                let mut j = i;
                while j < end && self.size(j).fixed_size {
                    j += 1;
                }
                self.skip_leaves(plan, i, j)?;
                let (bits, refs) = self.batch(i, j)?;
                e.push_int(i128::from(bits))?;
                e.push_int(i128::from(refs))?;
                e.emit(Instr::SSkipFirst)?;
                i = j;
            } else {
                plan.skip_type(&self.leaves[i])?;
                e.load(&self.leaves[i])?;
                drop_qty += 1;
                i += 1;
            }
        }
        e.drop_under(drop_qty, 1)
    }

    fn batch(&self, i: usize, j: usize) -> CodegenResult<(u32, u32)> {
        self.fixed_size(i, j)
            .ok_or_else(|| CodegenError::Internal(format!("leaves {i}..{j} are not fixed-size")))
    }

    /// `s → s'`: skip the run starting at `index`, moving to the next cell
    /// when the run ends at a split.
    fn skip_types_and_load_cell_if_needed(
        &self,
        e: &mut Emitter,
        plan: &mut LayoutPlan,
        index: usize,
    ) -> CodegenResult<()> {
        let next = self.to[index];
        if !(next <= self.last && plan.starts_new_cell(next)) {
            return self.skip_types(e, plan, index, next);
        }
        if let Some(refs) = self.fixed_refs(index, next) {
            // the link follows the run's own references
            e.emit(Instr::PldRefIdx(small_ref(refs)?))?;
            e.emit(Instr::Ctos)?;
            self.skip_leaves(plan, index, next)
        } else if index + 1 == next {
            self.skip_types(e, plan, index, next)?;
            e.emit(Instr::PldRefIdx(0))?;
            e.emit(Instr::Ctos)
        } else {
            // only the link is left once the run is cut away
            e.push_int(0)?;
            e.push_int(1)?;
            e.emit(Instr::SCutLast)?;
            e.emit(Instr::LdRefRtos)?;
            e.drop_under(1, 1)?;
            self.skip_leaves(plan, index, next)
        }
    }

    // ══════════════════════════════════════════════════════════════════════════
    // Unpack
    // ══════════════════════════════════════════════════════════════════════════

    /// `s → v1 … vk`: decode the needed variables, in order, and discard
    /// the slice.
    pub fn unpacked_data(&self, e: &mut Emitter) -> CodegenResult<()> {
        let entry = e.depth();
        if entry == 0 {
            return Err(CodegenError::StackUnderflow {
                context: "unpacked_data".into(),
            });
        }
        let mut plan = self.create_position()?;

        if plan.starts_new_cell(self.start) {
            load_link(e)?;
        }
        let mut i = self.start;
        while i <= self.last {
            if let Some(v) = self.var_index[i] {
                let mut next = i + 1;
                while next <= self.last && self.var_index[next] == Some(v) {
                    next += 1;
                }
                decode_parameter(e, &self.var_types[v], &mut plan, true, false)?;
                if next <= self.last && plan.starts_new_cell(next) {
                    load_link(e)?;
                }
                i = next;
            } else {
                self.skip_types_and_load_cell_if_needed(e, &mut plan, i)?;
                i = self.to[i];
            }
        }
        e.drop(1)?;

        e.ensure_depth(entry - 1 + self.needed_vars, "unpacked_data")
    }

    // ══════════════════════════════════════════════════════════════════════════
    // Pack
    // ══════════════════════════════════════════════════════════════════════════

    /// `s → s'`: rewrite the needed variables of the stored data in `s`.
    ///
    /// `provide(v, e)` must push the new value of variable `v`; it is called
    /// once for each needed variable, in order.  Everything else is copied
    /// from `s`, so the result has the same layout and, when every provider
    /// pushes the old value, the same bits.
    pub fn pack_data(
        &self,
        e: &mut Emitter,
        provide: &mut dyn FnMut(usize, &mut Emitter) -> CodegenResult<()>,
    ) -> CodegenResult<()> {
        let entry = e.depth();
        if entry == 0 {
            return Err(CodegenError::StackUnderflow {
                context: "pack_data".into(),
            });
        }
        let mut plan = self.create_position()?;
        let mut slots = self.unpack_all(e, &mut plan, provide)?;

        // s_tail fragments… b
        e.emit(Instr::Newc)?;
        let mut builder_qty = 1;
        let mut i = self.start;
        while i <= self.last {
            if let Some(v) = self.var_index[i] {
                let mut next = i + 1;
                while next <= self.last && self.var_index[next] == Some(v) {
                    next += 1;
                }
                for j in i..next {
                    if plan.starts_new_cell(j) {
                        open_builder(e, entry, &mut builder_qty)?;
                    }
                    let leaf = &self.leaves[j];
                    expose_leaf(e, &mut slots, leaf)?;
                    e.store(leaf)?;
                    slots.pop();
                }
                i = next;
            } else {
                let next = self.to[i];
                let split_here = plan.starts_new_cell(i);
                let split_next = plan.starts_new_cell(next);
                if split_next {
                    if split_here {
                        open_builder(e, entry, &mut builder_qty)?;
                    }
                    store_raw(e, &mut slots)?;
                } else {
                    if split_here {
                        open_builder(e, entry, &mut builder_qty)?;
                    }
                    let mut j = i;
                    while j < next {
                        if self.size(j).fixed_size {
                            while j < next && self.size(j).fixed_size {
                                j += 1;
                            }
                            store_raw(e, &mut slots)?;
                        } else {
                            let leaf = &self.leaves[j];
                            pop_value(&mut slots, leaf)?;
                            e.store(leaf)?;
                            j += 1;
                        }
                    }
                }
                i = next;
            }
        }

        // the unread tail of the original chain
        e.emit(Instr::StSlice)?;
        for _ in 1..builder_qty {
            e.emit(Instr::StbRefR)?;
        }
        e.emit(Instr::Endc)?;
        e.emit(Instr::Ctos)?;

        if !slots.is_empty() {
            return Err(CodegenError::Internal(format!(
                "{} unpacked fragments left after repacking",
                slots.len()
            )));
        }
        e.ensure_depth(entry, "pack_data")
    }

    /// `s → s_tail fk … f1`: split the data into fragments, the first one
    /// on top, substituting provided values for needed variables.
    fn unpack_all(
        &self,
        e: &mut Emitter,
        plan: &mut LayoutPlan,
        provide: &mut dyn FnMut(usize, &mut Emitter) -> CodegenResult<()>,
    ) -> CodegenResult<Vec<Slot>> {
        let entry = e.depth();
        let mut slots = Vec::new();

        if plan.starts_new_cell(self.start) {
            load_link(e)?;
        }
        let mut i = self.start;
        while i <= self.last {
            if self.is_needed(i) {
                let mut next = i + 1;
                while next <= self.last && self.is_needed(next) {
                    next += 1;
                }
                match self.var_index[i] {
                    Some(v) if i + 1 == next && (next > self.last || !plan.starts_new_cell(next)) => {
                        // old value is loaded only to get past it
                        plan.skip_type(&self.leaves[i])?;
                        e.load(&self.leaves[i])?;
                        call_provider(e, provide, v)?;
                        e.pop_s(2)?;
                        slots.push(Slot::Value(self.var_types[v].clone()));
                    }
                    _ => {
                        let mut j = i;
                        while j < next {
                            let to_j = self.to[j];
                            self.skip_types_and_load_cell_if_needed(e, plan, j)?;
                            j = to_j;
                        }
                        let mut var_qty = 0;
                        for j in i..next {
                            if j > i && self.var_index[j - 1] == self.var_index[j] {
                                continue;
                            }
                            if let Some(v) = self.var_index[j] {
                                call_provider(e, provide, v)?;
                                slots.push(Slot::Value(self.var_types[v].clone()));
                                var_qty += 1;
                            }
                        }
                        e.block_swap(1, var_qty)?;
                    }
                }
                i = next;
            } else {
                let next = self.to[i];
                if plan.starts_new_cell(next) {
                    if self.fixed_refs(i, next) == Some(0) {
                        e.emit(Instr::LdRefRtos)?;
                    } else {
                        // s → head s'' where the head keeps every reference but the link
                        e.push_s(0)?;
                        e.emit(Instr::SBitRefs)?;
                        e.emit(Instr::Dec)?;
                        e.emit(Instr::Split)?;
                        load_link(e)?;
                    }
                    slots.push(Slot::Raw);
                    self.skip_leaves(plan, i, next)?;
                } else {
                    let mut j = i;
                    while j < next {
                        if self.size(j).fixed_size {
                            let mut k = j;
                            while k < next && self.size(k).fixed_size {
                                k += 1;
                            }
                            self.skip_leaves(plan, j, k)?;
                            let (bits, refs) = self.batch(j, k)?;
                            e.push_int(i128::from(bits))?;
                            e.push_int(i128::from(refs))?;
                            e.emit(Instr::Split)?;
                            slots.push(Slot::Raw);
                            j = k;
                        } else {
                            let leaf = &self.leaves[j];
                            plan.skip_type(leaf)?;
                            e.load(leaf)?;
                            slots.push(Slot::Value(leaf.clone()));
                            j += 1;
                        }
                    }
                }
                i = next;
            }
        }

        let delta = e.depth() - entry;
        if delta != slots.len() {
            return Err(CodegenError::StackMismatch {
                context: "repack fragments".into(),
                expected: entry + slots.len(),
                found: e.depth(),
            });
        }
        e.reverse(delta + 1, 0)?;
        slots.reverse();
        Ok(slots)
    }
}

/// `s → s''`: continue with the cell behind the first reference.
fn load_link(e: &mut Emitter) -> CodegenResult<()> {
    e.emit(Instr::LdRefRtos)?;
    e.drop_under(1, 1)
}

/// Finished builders go under the tail slice and the fragments still to
/// be stored; a new one takes their place on top.
fn open_builder(e: &mut Emitter, entry: usize, builder_qty: &mut usize) -> CodegenResult<()> {
    let stack_delta = e.depth() + 1 - entry - *builder_qty;
    e.block_swap(stack_delta, 1)?;
    e.emit(Instr::Newc)?;
    *builder_qty += 1;
    Ok(())
}

fn call_provider(
    e: &mut Emitter,
    provide: &mut dyn FnMut(usize, &mut Emitter) -> CodegenResult<()>,
    v: usize,
) -> CodegenResult<()> {
    let before = e.depth();
    provide(v, e)?;
    e.ensure_depth(before + 1, "repack value provider")
}

fn store_raw(e: &mut Emitter, slots: &mut Vec<Slot>) -> CodegenResult<()> {
    match slots.pop() {
        Some(Slot::Raw) => e.emit(Instr::StSlice),
        other => Err(CodegenError::Internal(format!(
            "expected a raw fragment, found {:?}",
            other
        ))),
    }
}

fn pop_value(slots: &mut Vec<Slot>, leaf: &TypeRef) -> CodegenResult<()> {
    match slots.pop() {
        Some(Slot::Value(ty)) if *ty == **leaf => Ok(()),
        other => Err(CodegenError::Internal(format!(
            "expected a `{}` value, found {:?}",
            leaf, other
        ))),
    }
}

/// Break aggregates on top of the stack down until `leaf` is on top, just
/// under the builder.
fn expose_leaf(e: &mut Emitter, slots: &mut Vec<Slot>, leaf: &TypeRef) -> CodegenResult<()> {
    loop {
        let top = match slots.last() {
            Some(Slot::Value(ty)) => ty.clone(),
            other => {
                return Err(CodegenError::Internal(format!(
                    "expected a `{}` value, found {:?}",
                    leaf, other
                )))
            }
        };
        if *top == **leaf {
            return Ok(());
        }
        slots.pop();
        match &*top {
            Type::Struct(def) => {
                let n = def.fields.len();
                // struct builder
                e.exchange(1)?;
                e.untuple(n)?;
                // m[n-1] … m0 builder
                e.reverse(n + 1, 0)?;
                slots.extend(def.fields.iter().rev().map(|f| Slot::Value(f.ty.clone())));
            }
            Type::UserDefined { underlying, .. } => slots.push(Slot::Value(underlying.clone())),
            _ => {
                return Err(CodegenError::Internal(format!(
                    "`{}` does not contain leaf `{}`",
                    top, leaf
                )))
            }
        }
    }
}

fn small_ref(refs: u32) -> CodegenResult<u8> {
    u8::try_from(refs).map_err(|_| CodegenError::Internal(format!("reference index {refs}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uints(widths: &[u16]) -> Vec<TypeRef> {
        widths.iter().map(|w| Type::uint(*w)).collect()
    }

    #[test]
    fn jump_table_batches_runs() {
        let repack = PartialRepack::new(
            0,
            0,
            0,
            uints(&[8, 8, 8, 16, 16]),
            vec![false, false, false, true, false],
        )
        .unwrap();
        assert_eq!(repack.start, 0);
        assert_eq!(repack.last, 3);
        assert_eq!(&repack.to[..4], &[3, 3, 3, 4]);
    }

    #[test]
    fn skipped_prefix_is_one_sskipfirst() {
        let repack = PartialRepack::new(
            0,
            0,
            0,
            uints(&[8, 8, 8, 16]),
            vec![false, false, false, true],
        )
        .unwrap();
        let mut e = Emitter::new(1);
        repack.unpacked_data(&mut e).unwrap();
        assert_eq!(e.depth(), 1);
        assert_eq!(
            e.finish(),
            vec![
                Instr::PushInt(24),
                Instr::PushInt(0),
                Instr::SSkipFirst,
                Instr::Load(Type::uint(16)),
                Instr::Drop,
            ]
        );
    }

    #[test]
    fn nothing_needed_is_rejected() {
        assert!(PartialRepack::new(0, 0, 0, uints(&[8]), vec![false]).is_err());
        assert!(PartialRepack::new(0, 0, 1, uints(&[8]), vec![true]).is_err());
    }

    #[test]
    fn pack_restores_depth() {
        let repack = PartialRepack::new(
            0,
            0,
            1,
            uints(&[32, 64, 8, 256]),
            vec![false, true, false, true],
        )
        .unwrap();
        let mut e = Emitter::new(1);
        repack
            .pack_data(&mut e, &mut |_, e| e.push_int(5))
            .unwrap();
        assert_eq!(e.depth(), 1);
    }
}
