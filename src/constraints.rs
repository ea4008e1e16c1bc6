use na::DVector;
use nalgebra as na;

/// A single active/inactive threshold. `value` is only meaningful when
/// `active` is `true`; an inactive bound is never consulted.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Bound {
    pub active: bool,
    pub value: f64,
}

impl Bound {
    pub const fn inactive() -> Self {
        Bound { active: false, value: 0.0 }
    }

    pub const fn at(value: f64) -> Self {
        Bound { active: true, value }
    }
}

/// Per-index upper/lower bounds for one vector (observed states, or
/// parameters). Set once at configuration time, consulted on every
/// sigma-point clip and every corrected estimate.
#[derive(Debug, Clone)]
pub struct ConstraintSet {
    upper: Vec<Bound>,
    lower: Vec<Bound>,
}

impl ConstraintSet {
    /// Build a set of `len` inactive (unconstrained) bounds.
    pub fn unconstrained(len: usize) -> Self {
        ConstraintSet {
            upper: vec![Bound::inactive(); len],
            lower: vec![Bound::inactive(); len],
        }
    }

    pub fn len(&self) -> usize {
        self.upper.len()
    }

    pub fn is_empty(&self) -> bool {
        self.upper.is_empty()
    }

    pub fn set_upper(&mut self, index: usize, value: f64) {
        self.upper[index] = Bound::at(value);
    }

    pub fn set_lower(&mut self, index: usize, value: f64) {
        self.lower[index] = Bound::at(value);
    }

    pub fn clear_upper(&mut self, index: usize) {
        self.upper[index] = Bound::inactive();
    }

    pub fn clear_lower(&mut self, index: usize) {
        self.lower[index] = Bound::inactive();
    }

    /// Clamp `slice[i]` into `[lower[i], upper[i]]` for every active bound.
    pub fn clip(&self, slice: &mut [f64]) {
        for (i, v) in slice.iter_mut().enumerate() {
            let up = self.upper[i];
            if up.active && *v > up.value {
                *v = up.value;
            }
            let lo = self.lower[i];
            if lo.active && *v < lo.value {
                *v = lo.value;
            }
        }
    }
}

/// The full constraint table: one [`ConstraintSet`] for the observed
/// states, one for the estimated parameters. Applied to the
/// `[obs | pars]` augmented layout used throughout the filter.
#[derive(Debug, Clone)]
pub struct ConstraintTable {
    pub states: ConstraintSet,
    pub parameters: ConstraintSet,
}

impl ConstraintTable {
    pub fn unconstrained(n_obs: usize, n_pars: usize) -> Self {
        ConstraintTable {
            states: ConstraintSet::unconstrained(n_obs),
            parameters: ConstraintSet::unconstrained(n_pars),
        }
    }

    /// Clip an augmented `[obs | pars]` vector in place.
    pub fn clip_augmented(&self, x: &mut DVector<f64>) {
        let n_obs = self.states.len();
        let n_pars = self.parameters.len();
        self.states.clip(x.as_mut_slice()[0..n_obs].as_mut());
        self.parameters.clip(x.as_mut_slice()[n_obs..n_obs + n_pars].as_mut());
    }

    /// Clip a single row (given as a mutable slice view over the
    /// `[obs | pars | ...]` layout) in place; the trailing noise-dimension
    /// columns present in augmented sigma points are left untouched.
    pub fn clip_row(&self, row: &mut [f64]) {
        let n_obs = self.states.len();
        let n_pars = self.parameters.len();
        self.states.clip(&mut row[0..n_obs]);
        self.parameters.clip(&mut row[n_obs..n_obs + n_pars]);
    }
}
