use std::fmt;
use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use crate::error::MalformedShare;

/// One tensor of a client's model update, in fixed-point encoding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layer {
    pub dims: Vec<u32>,
    pub values: Vec<u64>,
}

impl Layer {
    pub fn new(dims: Vec<u32>, values: Vec<u64>) -> Self {
        Self { dims, values }
    }

    /// A one dimensional layer
    pub fn flat(values: Vec<u64>) -> Self {
        let len = u32::try_from(values.len()).unwrap_or(u32::MAX);
        Self {
            dims: vec![len],
            values,
        }
    }

    /// Number of elements implied by `dims`, `None` on overflow
    pub fn expected_len(&self) -> Option<usize> {
        self.dims
            .iter()
            .try_fold(1usize, |acc, dim| acc.checked_mul(*dim as usize))
    }

    pub fn has_same_shape(&self, other: &Layer) -> bool {
        self.dims == other.dims && self.values.len() == other.values.len()
    }
}

/// One client's contribution for a round
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Share {
    pub layers: Vec<Layer>,
}

impl Share {
    pub fn new(layers: Vec<Layer>) -> Self {
        Self { layers }
    }

    /// Decodes a share from its wire format, validating every layer
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, MalformedShare> {
        let share: Share = bincode::deserialize(bytes)?;

        for (index, layer) in share.layers.iter().enumerate() {
            if layer.expected_len() != Some(layer.values.len()) {
                return Err(MalformedShare::InconsistentLayer {
                    layer: index,
                    dims: layer.dims.clone(),
                    values: layer.values.len(),
                });
            }
        }

        Ok(share)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        bincode::serialize(self).expect("Serializing to a vector cannot fail")
    }
}

/// Where a submission came from, only used in logs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SenderId(Option<SocketAddr>);

impl SenderId {
    pub fn new(addr: SocketAddr) -> Self {
        Self(Some(addr))
    }

    pub fn unknown() -> Self {
        Self(None)
    }
}

impl fmt::Display for SenderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(addr) => write!(f, "{addr}"),
            None => f.write_str("unknown"),
        }
    }
}

/// A decoded share together with its transport metadata
#[derive(Debug, Clone)]
pub struct Submission {
    pub sender: SenderId,
    pub share: Share,
    /// Size of the share on the wire, used for cost accounting
    pub wire_len: usize,
}

impl Submission {
    pub fn from_bytes(sender: SenderId, bytes: &[u8]) -> Result<Self, MalformedShare> {
        Ok(Self {
            sender,
            share: Share::from_bytes(bytes)?,
            wire_len: bytes.len(),
        })
    }
}
