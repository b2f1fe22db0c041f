//! Round buffer and aggregation engine of the fedagg coordinator
//!
//! Clients submit fixed-point encoded shares of their model update. Once the
//! configured quorum of shares has arrived, the [`coordinator`] drains exactly
//! that many shares from the [`round_buffer`], combines them with the
//! [`aggregation`] engine and hands the encoded model to a broadcast
//! collaborator.

pub mod aggregation;
pub mod coordinator;
pub mod error;
pub mod fixed_point;
pub mod round_buffer;
pub mod share;
pub mod task;

pub use aggregation::{AggregatedLayer, AggregatedModel, AggregationEngine};
pub use coordinator::{
    CoordinatorStatus, CostCounters, DynBroadcast, IBroadcast, RoundCoordinator, RoundSummary,
    SubmitOutcome,
};
pub use error::{AggregationError, MalformedShare, RoundError, SubmitError};
pub use fixed_point::FixedPointCodec;
pub use round_buffer::RoundBuffer;
pub use share::{Layer, SenderId, Share, Submission};
