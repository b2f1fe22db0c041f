//! Combining a full round of shares into one model
//!
//! Every client's values are first scaled down by the number of clients and
//! re-encoded, and only then summed. Since the fixed-point encoding
//! truncates, this is not the same as summing first and dividing once: each
//! client contributes its own truncation error. The ordering is kept as is,
//! clients rely on the resulting values.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::AggregationError;
use crate::fixed_point::FixedPointCodec;
use crate::share::{Layer, Share};

/// Sum of one layer over all clients of a round
///
/// Accumulators are 128 bits wide so no sum of up to `2^64` encoded values
/// can overflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregatedLayer {
    pub dims: Vec<u32>,
    pub values: Vec<u128>,
}

impl AggregatedLayer {
    fn zeroed(like: &Layer) -> Self {
        Self {
            dims: like.dims.clone(),
            values: vec![0; like.values.len()],
        }
    }

    fn accumulate(&mut self, values: impl Iterator<Item = u64>) {
        for (acc, value) in self.values.iter_mut().zip(values) {
            *acc += u128::from(value);
        }
    }

    pub fn decode(&self, codec: &FixedPointCodec) -> Vec<f64> {
        self.values.iter().map(|v| codec.decode_wide(*v)).collect()
    }
}

/// The result of a round, keyed by layer index
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AggregatedModel {
    pub layers: BTreeMap<usize, AggregatedLayer>,
}

impl AggregatedModel {
    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(bytes)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AggregationEngine {
    codec: FixedPointCodec,
}

impl AggregationEngine {
    pub fn new(codec: FixedPointCodec) -> Self {
        Self { codec }
    }

    pub fn codec(&self) -> &FixedPointCodec {
        &self.codec
    }

    /// Combines a batch of shares, all of the same layout, into one model
    pub fn combine(&self, batch: Vec<Share>) -> Result<AggregatedModel, AggregationError> {
        check_shapes(&batch)?;

        let num_clients = batch.len();
        let template = &batch[0];
        let mut sums: Vec<AggregatedLayer> =
            template.layers.iter().map(AggregatedLayer::zeroed).collect();

        for share in &batch {
            for (sum, layer) in sums.iter_mut().zip(&share.layers) {
                sum.accumulate(
                    layer
                        .values
                        .iter()
                        .map(|v| self.codec.rescale(*v, num_clients)),
                );
            }
        }

        Ok(AggregatedModel {
            layers: sums.into_iter().enumerate().collect(),
        })
    }
}

fn check_shapes(batch: &[Share]) -> Result<(), AggregationError> {
    let Some((first, rest)) = batch.split_first() else {
        return Err(AggregationError::EmptyBatch);
    };

    for (idx, share) in rest.iter().enumerate() {
        let client = idx + 1;
        if share.layers.len() != first.layers.len() {
            return Err(AggregationError::LayerCount {
                client,
                expected: first.layers.len(),
                found: share.layers.len(),
            });
        }

        for (layer, (expected, found)) in first.layers.iter().zip(&share.layers).enumerate() {
            if !expected.has_same_shape(found) {
                return Err(AggregationError::LayerShape {
                    client,
                    layer,
                    expected: expected.dims.clone(),
                    found: found.dims.clone(),
                });
            }
        }
    }

    Ok(())
}
