//! Essential boundary conditions by global block row.

use crate::core::Scalar;
use crate::error::KError;
use crate::parallel::RowMap;

/// One constrained block: the listed variables of block `global` are fixed.
#[derive(Clone, Debug, PartialEq)]
pub struct BcEntry<T> {
    pub global: usize,
    /// Owned-local block index; must agree with the row map.
    pub local: usize,
    pub vars: Vec<usize>,
    /// Prescribed value per entry of `vars`.
    pub values: Vec<T>,
}

#[derive(Clone, Debug, Default)]
pub struct BcMap<T> {
    entries: Vec<BcEntry<T>>,
}

impl<T: Scalar> BcMap<T> {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Constrain `vars` of a block. An empty `values` means homogeneous conditions.
    pub fn add_bc(
        &mut self,
        global: usize,
        local: usize,
        vars: Vec<usize>,
        values: Vec<T>,
    ) -> Result<(), KError> {
        let values = if values.is_empty() { vec![T::zero(); vars.len()] } else { values };
        KError::check_len(vars.len(), values.len())?;
        self.entries.push(BcEntry { global, local, vars, values });
        Ok(())
    }

    pub fn entries(&self) -> &[BcEntry<T>] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries whose block row is owned by this rank, with the owned-local block index.
    pub fn owned<'a>(&'a self, rmap: &'a RowMap) -> impl Iterator<Item = (usize, &'a BcEntry<T>)> + 'a {
        let start = rmap.range().start;
        self.entries
            .iter()
            .filter(move |e| rmap.is_owned(e.global))
            .map(move |e| (e.global - start, e))
    }

    fn write_owned(
        &self,
        rmap: &RowMap,
        bsize: usize,
        x: &mut [T],
        value: impl Fn(&BcEntry<T>, usize) -> T,
    ) -> Result<(), KError> {
        KError::check_len(rmap.local_size() * bsize, x.len())?;
        for (row, entry) in self.owned(rmap) {
            for (k, &v) in entry.vars.iter().enumerate() {
                if v >= bsize {
                    return Err(KError::Config(format!(
                        "variable {v} is outside block size {bsize}"
                    )));
                }
                x[row * bsize + v] = value(entry, k);
            }
        }
        Ok(())
    }

    /// Zero the constrained entries of an owned vector with block size `bsize`.
    pub fn apply_to_vec(&self, rmap: &RowMap, bsize: usize, x: &mut [T]) -> Result<(), KError> {
        self.write_owned(rmap, bsize, x, |_, _| T::zero())
    }

    /// Write the prescribed values into the constrained entries of an owned vector.
    pub fn set_values(&self, rmap: &RowMap, bsize: usize, x: &mut [T]) -> Result<(), KError> {
        self.write_owned(rmap, bsize, x, |e, k| e.values[k])
    }
}
