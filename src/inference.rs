//! Boundary to the external model: batched prediction with aligned metadata.

use tracing::{debug, info};

use crate::aggregate::TrainingSet;
use crate::errors::IndexError;
use crate::types::{MembraneToken, SpecimenToken, StackToken};

/// External model that maps feature rows to distance predictions.
pub trait Predictor {
    /// Predict `batch_len` rows of `feature_len` values each.
    ///
    /// Must return `batch_len * label_width` values, row-major.
    fn predict(
        &mut self,
        features: &[f32],
        batch_len: usize,
        feature_len: usize,
    ) -> Result<Vec<f32>, IndexError>;
}

impl<F> Predictor for F
where
    F: FnMut(&[f32], usize, usize) -> Result<Vec<f32>, IndexError>,
{
    fn predict(
        &mut self,
        features: &[f32],
        batch_len: usize,
        feature_len: usize,
    ) -> Result<Vec<f32>, IndexError> {
        self(features, batch_len, feature_len)
    }
}

/// One predicted sample with its provenance and geometry.
#[derive(Clone, Debug, PartialEq)]
pub struct PredictionSample {
    /// Specimen token.
    pub specimen: SpecimenToken,
    /// Stack token.
    pub stack: StackToken,
    /// Membrane token.
    pub membrane: MembraneToken,
    /// Sample position (working bin).
    pub position: [f32; 3],
    /// Membrane normal.
    pub normal: [f32; 3],
    /// Euler angles.
    pub angle: [f32; 3],
    /// Ground-truth distances, one per target.
    pub label: Vec<f32>,
    /// Predicted distances, one per target.
    pub prediction: Vec<f32>,
}

/// Run `predictor` over `set` in batches of at most `batch_size` samples.
///
/// Output order matches the row order of `set`.
pub fn predict_in_batches<P>(
    set: &TrainingSet,
    predictor: &mut P,
    batch_size: usize,
) -> Result<Vec<PredictionSample>, IndexError>
where
    P: Predictor + ?Sized,
{
    if batch_size == 0 {
        return Err(IndexError::Configuration(
            "batch_size must be greater than zero".to_string(),
        ));
    }
    let width = set.label_width;
    if width == 0 {
        return Err(IndexError::Configuration(
            "training set has no label channels".to_string(),
        ));
    }
    check_aligned(set)?;
    let mut samples = Vec::with_capacity(set.len());
    for (batch_idx, start) in (0..set.len()).step_by(batch_size).enumerate() {
        let end = (start + batch_size).min(set.len());
        let batch_len = end - start;
        let features = set
            .features
            .get(start * set.feature_len..end * set.feature_len)
            .ok_or_else(|| {
                IndexError::integrity(format!(
                    "training set holds {} feature values, fewer than {} rows of {}",
                    set.features.len(),
                    end,
                    set.feature_len
                ))
            })?;
        let predictions = predictor.predict(features, batch_len, set.feature_len)?;
        if predictions.len() != batch_len * width {
            return Err(IndexError::integrity(format!(
                "predictor returned {} values for {batch_len} rows of width {width}",
                predictions.len()
            )));
        }
        for (offset, prediction) in predictions.chunks(width).enumerate() {
            let idx = start + offset;
            let label = set.label_row(idx).ok_or_else(|| {
                IndexError::integrity(format!("training set has no label row {idx}"))
            })?;
            samples.push(PredictionSample {
                specimen: set.specimens[idx].clone(),
                stack: set.stacks[idx].clone(),
                membrane: set.membranes[idx].clone(),
                position: set.positions[idx],
                normal: set.normals[idx],
                angle: set.angles[idx],
                label: label.to_vec(),
                prediction: prediction.to_vec(),
            });
        }
        debug!(batch = batch_idx, rows = batch_len, "predicted batch");
    }
    info!(samples = samples.len(), batch_size, "prediction complete");
    Ok(samples)
}

fn check_aligned(set: &TrainingSet) -> Result<(), IndexError> {
    let rows = set.len();
    let lengths = [
        ("normals", set.normals.len()),
        ("angles", set.angles.len()),
        ("specimens", set.specimens.len()),
        ("stacks", set.stacks.len()),
        ("membranes", set.membranes.len()),
    ];
    for (field, found) in lengths {
        if found != rows {
            return Err(IndexError::integrity(format!(
                "training set has {rows} positions but {found} rows of {field}"
            )));
        }
    }
    if set.features.len() != rows * set.feature_len || set.labels.len() != rows * set.label_width {
        return Err(IndexError::integrity(format!(
            "training set features or labels do not hold exactly {rows} rows"
        )));
    }
    Ok(())
}
