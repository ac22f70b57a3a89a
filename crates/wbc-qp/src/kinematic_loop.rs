//! Closed kinematic loops expressed as affine substitutions of the
//! decision vector.
//!
//! A loop states `q̈_dep = G q̈_indep + g`. Every loop registered with the
//! controller is folded into one substitution `z = T y + b`, where `y` is
//! the decision vector with the dependent joint accelerations removed, so
//! the loop holds exactly for any solution of the reduced problem.

use nalgebra::{DMatrix, DVector};
use wbc_core::CommandError;

/// A closed kinematic loop linking dependent joints to independent ones.
pub trait KinematicLoopFunction: Send + std::fmt::Debug {
    /// Joint indices whose accelerations stay free.
    fn independent_joints(&self) -> &[usize];

    /// Joint indices whose accelerations are implied by the loop.
    fn dependent_joints(&self) -> &[usize];

    /// Refresh `G` and `g` for the current joint state.
    fn update(&mut self, _positions: &DVector<f64>, _velocities: &DVector<f64>) {}

    /// `G` (dependent × independent).
    fn loop_jacobian(&self) -> &DMatrix<f64>;

    /// `g` (dependent).
    fn loop_convective_term(&self) -> &DVector<f64>;
}

/// Loop with a constant linear coupling, e.g. a four-bar approximated around
/// its operating point or a geared pair of joints.
#[derive(Debug, Clone)]
pub struct LinearCouplingLoop {
    independent: Vec<usize>,
    dependent: Vec<usize>,
    jacobian: DMatrix<f64>,
    convective: DVector<f64>,
}

impl LinearCouplingLoop {
    pub fn new(
        independent: Vec<usize>,
        dependent: Vec<usize>,
        jacobian: DMatrix<f64>,
    ) -> Result<Self, CommandError> {
        if jacobian.shape() != (dependent.len(), independent.len()) {
            return Err(CommandError::DimensionMismatch {
                what: "loop jacobian",
                expected: dependent.len() * independent.len(),
                got: jacobian.len(),
            });
        }
        let convective = DVector::zeros(dependent.len());
        Ok(Self {
            independent,
            dependent,
            jacobian,
            convective,
        })
    }

    /// `q̈_dependent = ratio · q̈_independent`.
    pub fn gear(independent: usize, dependent: usize, ratio: f64) -> Self {
        Self {
            independent: vec![independent],
            dependent: vec![dependent],
            jacobian: DMatrix::from_element(1, 1, ratio),
            convective: DVector::zeros(1),
        }
    }

    pub fn with_convective_term(mut self, term: DVector<f64>) -> Result<Self, CommandError> {
        if term.len() != self.dependent.len() {
            return Err(CommandError::DimensionMismatch {
                what: "loop convective term",
                expected: self.dependent.len(),
                got: term.len(),
            });
        }
        self.convective = term;
        Ok(self)
    }
}

impl KinematicLoopFunction for LinearCouplingLoop {
    fn independent_joints(&self) -> &[usize] {
        &self.independent
    }

    fn dependent_joints(&self) -> &[usize] {
        &self.dependent
    }

    fn loop_jacobian(&self) -> &DMatrix<f64> {
        &self.jacobian
    }

    fn loop_convective_term(&self) -> &DVector<f64> {
        &self.convective
    }
}

// ---------------------------------------------------------------------------
// LoopSubstitution
// ---------------------------------------------------------------------------

/// The set of registered loops and the substitution `z = T y + b` they imply.
#[derive(Debug)]
pub struct LoopSubstitution {
    loops: Vec<Box<dyn KinematicLoopFunction>>,
    /// Variable index of the first joint acceleration.
    joint_offset: usize,
    num_joints: usize,
    /// Reduced column of each decision variable, `None` for dependent ones.
    reduced_column: Vec<Option<usize>>,
    transform: DMatrix<f64>,
    offset: DVector<f64>,
}

impl LoopSubstitution {
    /// `problem_size` is the full decision vector length; joint `j` is
    /// variable `joint_offset + j`.
    pub fn new(problem_size: usize, joint_offset: usize, num_joints: usize) -> Self {
        Self {
            loops: Vec::new(),
            joint_offset,
            num_joints,
            reduced_column: (0..problem_size).map(Some).collect(),
            transform: DMatrix::identity(problem_size, problem_size),
            offset: DVector::zeros(problem_size),
        }
    }

    /// Register a loop. Loops must not share dependent joints and a dependent
    /// joint may not drive another loop.
    pub fn register(&mut self, function: Box<dyn KinematicLoopFunction>) -> Result<(), CommandError> {
        let is_dependent = |joint: usize, loops: &[Box<dyn KinematicLoopFunction>]| {
            loops.iter().any(|l| l.dependent_joints().contains(&joint))
        };
        for &j in function.independent_joints().iter().chain(function.dependent_joints()) {
            if j >= self.num_joints {
                return Err(CommandError::UnknownJoint {
                    index: j,
                    count: self.num_joints,
                });
            }
        }
        for &j in function.dependent_joints() {
            let drives = self.loops.iter().any(|l| l.independent_joints().contains(&j))
                || function.independent_joints().contains(&j);
            if is_dependent(j, &self.loops) || drives {
                return Err(CommandError::ConflictingLoopJoint(j));
            }
        }
        for &j in function.independent_joints() {
            if is_dependent(j, &self.loops) {
                return Err(CommandError::ConflictingLoopJoint(j));
            }
        }

        self.loops.push(function);
        let problem_size = self.reduced_column.len();
        let mut column = 0;
        for var in 0..problem_size {
            let dependent = var
                .checked_sub(self.joint_offset)
                .is_some_and(|j| is_dependent(j, &self.loops));
            self.reduced_column[var] = if dependent {
                None
            } else {
                column += 1;
                Some(column - 1)
            };
        }
        self.transform = DMatrix::zeros(problem_size, column);
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.loops.is_empty()
    }

    pub fn problem_size(&self) -> usize {
        self.reduced_column.len()
    }

    pub fn reduced_size(&self) -> usize {
        self.transform.ncols()
    }

    /// Rebuild `T` and `b` for the current joint state.
    pub fn update(&mut self, positions: &DVector<f64>, velocities: &DVector<f64>) {
        self.transform.fill(0.0);
        self.offset.fill(0.0);
        for (var, column) in self.reduced_column.iter().enumerate() {
            if let Some(c) = column {
                self.transform[(var, *c)] = 1.0;
            }
        }
        for function in &mut self.loops {
            function.update(positions, velocities);
            let g = function.loop_jacobian();
            let b = function.loop_convective_term();
            for (row, &dep) in function.dependent_joints().iter().enumerate() {
                let var = self.joint_offset + dep;
                self.offset[var] = b[row];
                for (k, &indep) in function.independent_joints().iter().enumerate() {
                    if let Some(c) = self.reduced_column[self.joint_offset + indep] {
                        self.transform[(var, c)] = g[(row, k)];
                    }
                }
            }
        }
    }

    pub fn transform(&self) -> &DMatrix<f64> {
        &self.transform
    }

    pub fn offset(&self) -> &DVector<f64> {
        &self.offset
    }

    /// `z = T y + b`.
    pub fn expand(&self, reduced: &DVector<f64>, full: &mut DVector<f64>) {
        full.copy_from(&self.offset);
        full.gemv(1.0, &self.transform, reduced, 1.0);
    }

    /// Decision variables that are dependent.
    pub fn dependent_variables(&self) -> impl Iterator<Item = usize> + '_ {
        self.reduced_column
            .iter()
            .enumerate()
            .filter_map(|(var, c)| c.is_none().then_some(var))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn gear_substitution_couples_joints() {
        // Two base-free joints followed by one rho.
        let mut sub = LoopSubstitution::new(3, 0, 2);
        sub.register(Box::new(LinearCouplingLoop::gear(0, 1, -2.0)))
            .unwrap();
        assert_eq!(sub.reduced_size(), 2);
        sub.update(&DVector::zeros(2), &DVector::zeros(2));

        let mut full = DVector::zeros(3);
        sub.expand(&DVector::from_vec(vec![1.5, 0.25]), &mut full);
        assert_relative_eq!(full[0], 1.5);
        assert_relative_eq!(full[1], -3.0);
        assert_relative_eq!(full[2], 0.25);
        assert_eq!(sub.dependent_variables().collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn convective_term_becomes_offset() {
        let mut sub = LoopSubstitution::new(8, 6, 2);
        let function = LinearCouplingLoop::gear(0, 1, 1.0)
            .with_convective_term(DVector::from_element(1, 0.5))
            .unwrap();
        sub.register(Box::new(function)).unwrap();
        sub.update(&DVector::zeros(2), &DVector::zeros(2));
        assert_relative_eq!(sub.offset()[7], 0.5);
        assert_relative_eq!(sub.transform()[(7, 6)], 1.0);
    }

    #[test]
    fn rejects_conflicting_loops() {
        let mut sub = LoopSubstitution::new(3, 0, 3);
        sub.register(Box::new(LinearCouplingLoop::gear(0, 1, 1.0)))
            .unwrap();
        assert_eq!(
            sub.register(Box::new(LinearCouplingLoop::gear(2, 1, 1.0))),
            Err(CommandError::ConflictingLoopJoint(1))
        );
        assert_eq!(
            sub.register(Box::new(LinearCouplingLoop::gear(1, 2, 1.0))),
            Err(CommandError::ConflictingLoopJoint(1))
        );
        assert!(sub.register(Box::new(LinearCouplingLoop::gear(0, 5, 1.0))).is_err());
        assert!(sub.register(Box::new(LinearCouplingLoop::gear(0, 2, 1.0))).is_ok());
    }

    #[test]
    fn jacobian_shape_is_checked() {
        let err = LinearCouplingLoop::new(vec![0], vec![1], DMatrix::zeros(2, 1)).unwrap_err();
        assert!(matches!(err, CommandError::DimensionMismatch { .. }));
    }
}
