use serde::Serialize;

/// Ordered phases of field names. Every field of a phase depends only on
/// fields of earlier phases, so a phase can be computed in any order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ComputationPlan {
    phases: Vec<Vec<String>>,
}

impl ComputationPlan {
    pub fn new(phases: Vec<Vec<String>>) -> Self {
        Self { phases }
    }

    #[inline]
    #[must_use]
    pub fn phases(&self) -> &[Vec<String>] {
        &self.phases
    }

    /// Number of phases
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.phases.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }

    /// Every field in execution order
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.phases.iter().flatten().map(String::as_str)
    }

    pub fn field_count(&self) -> usize {
        self.phases.iter().map(Vec::len).sum()
    }

    /// Index of the phase computing `field`
    pub fn phase_of(&self, field: &str) -> Option<usize> {
        self.phases
            .iter()
            .position(|phase| phase.iter().any(|f| f == field))
    }
}
