//! Versioned 3x3 transformation state.
//!
//! [`VersionedMatrix`] owns the live matrix, the attached correspondences, the
//! inlier mask, a bounded history of [`Snapshot`]s and the observer registry.
//! [`TransformationMatrix`] builds the public query and navigation surface on
//! top of it; concrete kinds only supply their error model.
//!
//! Every committed mutation appends the resulting `{matrix, mask}` pair to the
//! history and moves the cursor to it, so the entry under the cursor always
//! describes the live state and the entry before it the state the mutation
//! started from. The history is append-only: navigating back and then mutating
//! appends after the newest entry instead of discarding the entries ahead of
//! the cursor. Once [`HISTORY_CAPACITY`] entries are stored the oldest is
//! evicted.

use std::cell::OnceCell;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use twoview_linalg::linalg::{condition_number, determinant, matrix_rank};
use twoview_linalg::{Mat3F64, Vec2F64};

use crate::error::TransformError;
use crate::stats::{ErrorStatistics, ResidualSet};

/// Maximum number of history entries kept.
pub const HISTORY_CAPACITY: usize = 10;

/// Callback invoked with the matrix after every committed mutation.
pub type Observer<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Immutable `{matrix, mask}` history entry.
#[derive(Clone, Debug, PartialEq)]
pub struct Snapshot {
    /// The matrix at the time of the commit.
    pub matrix: Mat3F64,
    /// The inlier mask; `None` stands for "all correspondences".
    pub mask: Option<Vec<bool>>,
}

struct DerivedCache<R> {
    determinant: OnceCell<f64>,
    condition: OnceCell<f64>,
    error: OnceCell<R>,
}

impl<R> Default for DerivedCache<R> {
    fn default() -> Self {
        Self {
            determinant: OnceCell::new(),
            condition: OnceCell::new(),
            error: OnceCell::new(),
        }
    }
}

/// Matrix, correspondences, mask, history and observers of one transformation.
///
/// `T` is the owning matrix kind handed to observers, `R` its error type.
pub struct VersionedMatrix<T, R> {
    matrix: Mat3F64,
    x1: Vec<Vec2F64>,
    x2: Vec<Vec2F64>,
    count: usize,
    mask: Vec<bool>,
    history: VecDeque<Snapshot>,
    cursor: usize,
    observers: Vec<Observer<T>>,
    cache: DerivedCache<R>,
}

impl<T, R> VersionedMatrix<T, R> {
    /// Wrap `matrix` for `count` correspondences.
    ///
    /// The live mask selects every correspondence and the history holds a single
    /// snapshot of the raw matrix without a mask.
    pub fn new(matrix: Mat3F64, count: usize) -> Self {
        let mut history = VecDeque::with_capacity(HISTORY_CAPACITY);
        history.push_back(Snapshot { matrix, mask: None });
        Self {
            matrix,
            x1: Vec::new(),
            x2: Vec::new(),
            count,
            mask: vec![true; count],
            history,
            cursor: 0,
            observers: Vec::new(),
            cache: DerivedCache::default(),
        }
    }

    /// The live matrix.
    #[inline]
    pub fn matrix(&self) -> &Mat3F64 {
        &self.matrix
    }

    /// The live inlier mask.
    #[inline]
    pub fn mask(&self) -> &[bool] {
        &self.mask
    }

    /// The attached correspondences, empty until an estimate is computed.
    #[inline]
    pub fn correspondences(&self) -> (&[Vec2F64], &[Vec2F64]) {
        (&self.x1, &self.x2)
    }

    /// Number of stored history entries.
    #[inline]
    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Index of the history entry describing the live state.
    #[inline]
    pub fn current_index(&self) -> usize {
        self.cursor
    }

    /// History entry `index`, oldest first.
    pub fn snapshot(&self, index: usize) -> Option<&Snapshot> {
        self.history.get(index)
    }

    /// Number of registered observers.
    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    pub(crate) fn attach(&mut self, x1: &[Vec2F64], x2: &[Vec2F64]) {
        self.x1 = x1.to_vec();
        self.x2 = x2.to_vec();
        self.count = x1.len();
    }

    /// Replace the live matrix and mask and append the result to the history.
    pub(crate) fn commit(&mut self, matrix: Mat3F64, mask: Option<Vec<bool>>) {
        self.matrix = matrix;
        self.mask = mask.clone().unwrap_or_else(|| vec![true; self.count]);
        if self.history.len() == HISTORY_CAPACITY {
            self.history.pop_front();
        }
        self.history.push_back(Snapshot { matrix, mask });
        self.cursor = self.history.len() - 1;
        self.invalidate();
        log::debug!(
            "committed history entry {} / {}",
            self.cursor + 1,
            self.history.len()
        );
    }

    /// Drop every entry but the one under the cursor, which becomes entry 0.
    pub(crate) fn rebase(&mut self) {
        if let Some(current) = self.history.get(self.cursor).cloned() {
            self.history.clear();
            self.history.push_back(current);
        }
        self.cursor = 0;
    }

    /// Move the cursor to `index` (clamped) and restore the live state from it.
    pub(crate) fn restore(&mut self, index: usize) {
        let index = index.min(self.history.len().saturating_sub(1));
        if let Some(entry) = self.history.get(index) {
            self.matrix = entry.matrix;
            self.mask = entry
                .mask
                .clone()
                .unwrap_or_else(|| vec![true; self.count]);
        }
        self.cursor = index;
        self.invalidate();
    }

    pub(crate) fn invalidate(&mut self) {
        self.cache = DerivedCache::default();
    }

    fn subscribe(&mut self, observer: Observer<T>) -> bool {
        if self.observers.iter().any(|o| Arc::ptr_eq(o, &observer)) {
            return false;
        }
        self.observers.push(observer);
        true
    }
}

impl<T, R> fmt::Debug for VersionedMatrix<T, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VersionedMatrix")
            .field("matrix", &self.matrix)
            .field("correspondences", &self.x1.len())
            .field("inliers", &self.mask.iter().filter(|&&m| m).count())
            .field("history_len", &self.history.len())
            .field("cursor", &self.cursor)
            .field("observers", &self.observers.len())
            .finish()
    }
}

/// Common interface of versioned transformation matrices.
///
/// Implementors expose their [`VersionedMatrix`] and an error model; the
/// derived quantities, history navigation and observer handling are provided.
pub trait TransformationMatrix: Sized {
    /// Per-correspondence error produced by [`TransformationMatrix::compute_error`].
    type Residuals: ResidualSet + Clone;

    /// Shared state.
    fn state(&self) -> &VersionedMatrix<Self, Self::Residuals>;

    /// Shared state, mutably.
    fn state_mut(&mut self) -> &mut VersionedMatrix<Self, Self::Residuals>;

    /// Error of the live matrix on `x1 <-> x2`, restricted to `mask` when given.
    fn compute_error(
        &self,
        x1: &[Vec2F64],
        x2: &[Vec2F64],
        mask: Option<&[bool]>,
    ) -> Self::Residuals;

    /// Re-derive the matrix from its attached state.
    fn recompute_matrix(&mut self) -> Result<(), TransformError> {
        Err(TransformError::Unsupported {
            operation: "recompute_matrix",
        })
    }

    /// Refine the matrix in place.
    fn refine(&mut self) -> Result<(), TransformError> {
        Err(TransformError::Unsupported {
            operation: "refine",
        })
    }

    /// The live matrix.
    fn matrix(&self) -> &Mat3F64 {
        self.state().matrix()
    }

    /// Determinant of the live matrix, cached until the next mutation.
    fn determinant(&self) -> f64 {
        let state = self.state();
        *state
            .cache
            .determinant
            .get_or_init(|| determinant(state.matrix()))
    }

    /// Numerical rank of the live matrix.
    fn rank(&self) -> usize {
        matrix_rank(self.matrix())
    }

    /// Ratio of the two largest singular values, cached until the next mutation.
    fn condition(&self) -> f64 {
        let state = self.state();
        *state
            .cache
            .condition
            .get_or_init(|| condition_number(state.matrix()))
    }

    /// Error over the masked attached correspondences, cached until the next mutation.
    fn error(&self) -> &Self::Residuals {
        let state = self.state();
        state.cache.error.get_or_init(|| {
            let (x1, x2) = state.correspondences();
            self.compute_error(x1, x2, Some(state.mask()))
        })
    }

    /// Summary statistics of [`TransformationMatrix::error`].
    fn describe_error(&self) -> ErrorStatistics {
        ErrorStatistics::from_values(&self.error().magnitudes())
    }

    /// The live inlier mask.
    fn mask(&self) -> &[bool] {
        self.state().mask()
    }

    /// Register `observer`. Returns `false` if the same handle is already registered.
    fn subscribe(&mut self, observer: Observer<Self>) -> bool {
        self.state_mut().subscribe(observer)
    }

    /// Invoke every observer with `self`.
    fn notify_subscribers(&self) {
        for observer in &self.state().observers {
            observer(self);
        }
    }

    /// Step the cursor back by `n` entries (clamped at the oldest) and restore it.
    fn rollback(&mut self, n: usize) {
        let index = self.state().current_index().saturating_sub(n);
        self.state_mut().restore(index);
        self.notify_subscribers();
    }

    /// Step the cursor forward by `n` entries (clamped at the newest) and restore it.
    fn rollforward(&mut self, n: usize) {
        let index = self.state().current_index().saturating_add(n);
        self.state_mut().restore(index);
        self.notify_subscribers();
    }

    /// Number of stored history entries.
    fn history_len(&self) -> usize {
        self.state().history_len()
    }

    /// Index of the history entry describing the live state.
    fn current_index(&self) -> usize {
        self.state().current_index()
    }

    /// History entry `index`, oldest first.
    fn snapshot(&self, index: usize) -> Option<&Snapshot> {
        self.state().snapshot(index)
    }
}

/// Indices selected by an optional mask; `None` selects all `n`.
pub(crate) fn selected(n: usize, mask: Option<&[bool]>) -> Vec<usize> {
    match mask {
        Some(mask) => (0..n).filter(|&i| mask.get(i).copied().unwrap_or(false)).collect(),
        None => (0..n).collect(),
    }
}
