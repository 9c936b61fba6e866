//! Reconciliation engine: snapshot + policy into connect/disconnect sets.
//!
//! Pure and deterministic. The same snapshot and policy always produce the
//! same plan, in the same order, which keeps cycle behavior reproducible
//! from captured command output.

use crate::collect::ConnectionSnapshot;
use crate::config::ConnectPolicy;
use dba_common::{DeviceSerial, EndpointAddress};
use serde::{Deserialize, Serialize};

/// What one cycle should do.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcilePlan {
    /// Endpoints to launch a connect attempt for, in discovery order.
    pub to_connect: Vec<EndpointAddress>,
    /// Offline devices to disconnect.
    pub to_disconnect: Vec<DeviceSerial>,
}

impl ReconcilePlan {
    pub fn is_empty(&self) -> bool {
        self.to_connect.is_empty() && self.to_disconnect.is_empty()
    }
}

/// Compute the plan for one snapshot.
///
/// Candidates are re-checked against the policy and the already-connected
/// set, so the filtering guarantees hold for any snapshot value, not only
/// ones built by [`ConnectionSnapshot::capture`].
pub fn reconcile(snapshot: &ConnectionSnapshot, policy: &ConnectPolicy) -> ReconcilePlan {
    let mut to_connect: Vec<EndpointAddress> = Vec::with_capacity(snapshot.candidates.len());
    for endpoint in &snapshot.candidates {
        if snapshot.connected.contains(endpoint)
            || policy.admits(endpoint).is_err()
            || to_connect.contains(endpoint)
        {
            continue;
        }
        to_connect.push(*endpoint);
    }

    ReconcilePlan {
        to_connect,
        to_disconnect: snapshot.offline.clone(),
    }
}
