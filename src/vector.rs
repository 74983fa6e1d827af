use crate::types::RecordId;
use rand::Rng;
use std::sync::Arc;

/// A vector tagged with the record it belongs to.
/// The data is stored in an Arc for cheap cloning.
#[derive(Clone, Debug)]
pub struct Vector {
    pub id: RecordId,
    pub data: Arc<[f32]>,
}

impl Vector {
    /// Create a new vector with the given ID and data.
    pub fn new(id: impl Into<RecordId>, data: Vec<f32>) -> Self {
        Self {
            id: id.into(),
            data: data.into(),
        }
    }

    /// Create a random vector with values uniformly distributed in [-1.0, 1.0].
    ///
    /// Takes the RNG explicitly so benchmark workloads stay reproducible.
    pub fn random<R: Rng + ?Sized>(rng: &mut R, id: impl Into<RecordId>, dim: usize) -> Self {
        let data: Vec<f32> = (0..dim).map(|_| rng.gen_range(-1.0..1.0)).collect();
        Self::new(id, data)
    }

    /// Return the dimensionality of this vector.
    pub fn dim(&self) -> usize {
        self.data.len()
    }
}
