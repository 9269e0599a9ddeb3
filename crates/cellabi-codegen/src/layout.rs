//! Cell layout planning.
//!
//! A [`LayoutPlan`] decides, for every flattened leaf of a parameter list,
//! whether that leaf must open a new cell.  Encoding, decoding and partial
//! repacking all consume the same plan, so they agree on every split point.
//!
//! The plan is also a single-pass cursor: callers walk the leaves in order
//! through [`Position::skip_type`], and presenting any other leaf is an
//! error rather than a silent desync.

use cellabi_types::{
    flatten_all, oversized_payload, TypeRef, TypeSize, CELL_BIT_LENGTH, CELL_REF_LIMIT,
};
use tracing::{debug, trace};

use crate::error::{CodegenError, CodegenResult};

/// A strategy that tells the codec where cells split.
pub trait Position {
    /// Consume the next leaf and report whether it starts a new cell.
    fn skip_type(&mut self, ty: &TypeRef) -> CodegenResult<bool>;
}

/// Position for data that always fits one slice: never splits.
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleSlicePosition;

impl Position for SingleSlicePosition {
    fn skip_type(&mut self, _ty: &TypeRef) -> CodegenResult<bool> {
        Ok(false)
    }
}

/// Split decisions for a flattened leaf list, plus its consumption cursor.
#[derive(Debug, Clone)]
pub struct LayoutPlan {
    leaves: Vec<TypeRef>,
    starts_new_cell: Vec<bool>,
    created_builders: usize,
    cursor: usize,
}

impl LayoutPlan {
    /// Plan `types` starting `bit_offset` bits and `ref_offset` references
    /// into the first cell.
    pub fn new(bit_offset: u32, ref_offset: u32, types: &[TypeRef]) -> CodegenResult<Self> {
        let leaves = flatten_all(types);
        if let Some(payload) = leaves.iter().find_map(|leaf| oversized_payload(leaf)) {
            return Err(CodegenError::Unsupported(format!(
                "optional payload `{}` does not fit one cell",
                payload
            )));
        }
        let sizes: Vec<TypeSize> = leaves.iter().map(|t| TypeSize::of(t)).collect();
        let n = leaves.len();

        let mut suf_bits = vec![0u32; n + 1];
        let mut suf_refs = vec![0u32; n + 1];
        for i in (0..n).rev() {
            suf_bits[i] = suf_bits[i + 1] + sizes[i].max_bits;
            suf_refs[i] = suf_refs[i + 1] + sizes[i].max_refs;
        }

        let mut bits = bit_offset;
        let mut refs = ref_offset;
        let mut starts_new_cell = vec![false; n];
        let mut created_builders = 0;
        for (i, size) in sizes.iter().enumerate() {
            bits += size.max_bits;
            refs += size.max_refs;
            if bits - size.max_bits + suf_bits[i] <= CELL_BIT_LENGTH
                && refs - size.max_refs + suf_refs[i] <= CELL_REF_LIMIT
            {
                // everything left still fits the current cell
                continue;
            }
            if bits > CELL_BIT_LENGTH || refs >= CELL_REF_LIMIT {
                starts_new_cell[i] = true;
                bits = size.max_bits;
                refs = size.max_refs;
                created_builders += 1;
                trace!(leaf = i, ty = %leaves[i], "leaf opens a new cell");
            }
            // one reference stays free for the link to the next cell
            if bits > CELL_BIT_LENGTH || refs >= CELL_REF_LIMIT {
                return Err(CodegenError::Unsupported(format!(
                    "`{}` does not fit a chained cell ({} bits, {} refs)",
                    leaves[i], size.max_bits, size.max_refs
                )));
            }
        }

        debug!(
            leaves = n,
            bit_offset,
            ref_offset,
            splits = created_builders,
            "planned cell layout"
        );
        Ok(Self {
            leaves,
            starts_new_cell,
            created_builders,
            cursor: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.leaves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }

    pub fn leaves(&self) -> &[TypeRef] {
        &self.leaves
    }

    /// Per-leaf split flags.
    pub fn splits(&self) -> &[bool] {
        &self.starts_new_cell
    }

    /// Whether leaf `index` opens a new cell.  Past the end there is no
    /// leaf and hence no split.
    pub fn starts_new_cell(&self, index: usize) -> bool {
        self.starts_new_cell.get(index).copied().unwrap_or(false)
    }

    /// Number of cells opened after the first one.
    pub fn count_of_created_builders(&self) -> usize {
        self.created_builders
    }

    /// Index of the next leaf the cursor expects.
    pub fn current_index(&self) -> usize {
        self.cursor
    }

    /// Flatten each of `types` and consume every resulting leaf.
    pub fn skip_types(&mut self, types: &[TypeRef]) -> CodegenResult<()> {
        for leaf in flatten_all(types) {
            self.skip_type(&leaf)?;
        }
        Ok(())
    }
}

impl Position for LayoutPlan {
    fn skip_type(&mut self, ty: &TypeRef) -> CodegenResult<bool> {
        let i = self.cursor;
        let expected = self.leaves.get(i).ok_or(CodegenError::LayoutExhausted {
            planned: self.leaves.len(),
        })?;
        if **expected != **ty {
            return Err(CodegenError::LayoutMismatch {
                index: i,
                expected: expected.to_string(),
                found: ty.to_string(),
            });
        }
        self.cursor += 1;
        Ok(self.starts_new_cell[i])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellabi_types::{StructDef, Type};

    #[test]
    fn exact_fit_does_not_split() {
        // 3 × 341 = 1023
        let plan = LayoutPlan::new(0, 0, &vec![Type::uint(341); 3]).unwrap();
        assert_eq!(plan.splits(), &[false, false, false]);
    }

    #[test]
    fn offset_pushes_first_leaf_out() {
        let plan = LayoutPlan::new(1000, 0, &[Type::uint(64)]).unwrap();
        assert_eq!(plan.splits(), &[true]);
        assert_eq!(plan.count_of_created_builders(), 1);
    }

    #[test]
    fn four_refs_force_link_slot() {
        let plan = LayoutPlan::new(0, 0, &vec![Type::cell(); 5]).unwrap();
        assert_eq!(plan.splits(), &[false, false, false, true, false]);

        let plan = LayoutPlan::new(0, 0, &vec![Type::cell(); 4]).unwrap();
        assert_eq!(plan.count_of_created_builders(), 0);
    }

    #[test]
    fn struct_leaves_are_planned_individually() {
        let pair = Type::structure(StructDef::new(
            "Pair",
            vec![("a", Type::uint(512)), ("b", Type::uint(512))],
        ));
        let plan = LayoutPlan::new(0, 0, &[Type::uint(8), pair]).unwrap();
        assert_eq!(plan.len(), 3);
        assert_eq!(plan.splits(), &[false, false, true]);
    }

    #[test]
    fn cursor_checks_order() {
        let mut plan = LayoutPlan::new(0, 0, &[Type::uint(8), Type::bool()]).unwrap();
        assert_eq!(plan.skip_type(&Type::uint(8)), Ok(false));
        assert_eq!(
            plan.skip_type(&Type::uint(8)),
            Err(CodegenError::LayoutMismatch {
                index: 1,
                expected: "bool".into(),
                found: "uint8".into(),
            })
        );
        assert_eq!(plan.skip_type(&Type::bool()), Ok(false));
        assert_eq!(
            plan.skip_type(&Type::bool()),
            Err(CodegenError::LayoutExhausted { planned: 2 })
        );
    }

    #[test]
    fn single_slice_never_splits() {
        let mut pos = SingleSlicePosition;
        for _ in 0..10 {
            assert_eq!(pos.skip_type(&Type::uint(256)), Ok(false));
        }
    }
}
