use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::EngineError;

#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StoreId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClusterId(pub String);

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One row of the cluster assignment table. `cluster_id == None` marks a
/// store that is excluded from peer comparison for this run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterAssignment {
    pub store_id: StoreId,
    pub cluster_id: Option<ClusterId>,
}

/// Indexed view of the cluster assignment table.
#[derive(Clone, Debug, Default)]
pub struct ClusterMap {
    members: BTreeMap<ClusterId, BTreeSet<StoreId>>,
    stores: BTreeMap<StoreId, Option<ClusterId>>,
}

impl ClusterMap {
    /// Builds the map, rejecting stores assigned to two different clusters.
    /// Repeated identical rows are tolerated.
    pub fn from_assignments(assignments: &[ClusterAssignment]) -> Result<Self, EngineError> {
        let mut map = Self::default();

        for assignment in assignments {
            match map.stores.get(&assignment.store_id) {
                Some(existing) if existing != &assignment.cluster_id => {
                    return Err(EngineError::InvariantViolation(format!(
                        "store `{}` is assigned to more than one cluster",
                        assignment.store_id
                    )));
                }
                Some(_) => continue,
                None => {}
            }

            map.stores.insert(assignment.store_id.clone(), assignment.cluster_id.clone());
            if let Some(cluster_id) = &assignment.cluster_id {
                map.members
                    .entry(cluster_id.clone())
                    .or_default()
                    .insert(assignment.store_id.clone());
            }
        }

        Ok(map)
    }

    pub fn cluster_of(&self, store_id: &StoreId) -> Option<&ClusterId> {
        self.stores.get(store_id).and_then(Option::as_ref)
    }

    pub fn members(&self, cluster_id: &ClusterId) -> Option<&BTreeSet<StoreId>> {
        self.members.get(cluster_id)
    }

    pub fn cluster_size(&self, cluster_id: &ClusterId) -> usize {
        self.members.get(cluster_id).map_or(0, BTreeSet::len)
    }

    pub fn clusters(&self) -> impl Iterator<Item = (&ClusterId, &BTreeSet<StoreId>)> {
        self.members.iter()
    }

    /// Every store in the assignment table, in store order, with its cluster.
    pub fn stores(&self) -> impl Iterator<Item = (&StoreId, Option<&ClusterId>)> {
        self.stores.iter().map(|(store, cluster)| (store, cluster.as_ref()))
    }

    pub fn store_count(&self) -> usize {
        self.stores.len()
    }

    pub fn cluster_count(&self) -> usize {
        self.members.len()
    }

    pub fn unassigned_count(&self) -> usize {
        self.stores.values().filter(|cluster| cluster.is_none()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::{ClusterAssignment, ClusterId, ClusterMap, StoreId};
    use crate::errors::EngineError;

    fn assign(store: &str, cluster: Option<&str>) -> ClusterAssignment {
        ClusterAssignment {
            store_id: StoreId(store.to_string()),
            cluster_id: cluster.map(|id| ClusterId(id.to_string())),
        }
    }

    #[test]
    fn groups_members_and_tracks_unassigned_stores() {
        let map = ClusterMap::from_assignments(&[
            assign("S1", Some("C1")),
            assign("S2", Some("C1")),
            assign("S3", Some("C2")),
            assign("S4", None),
        ])
        .expect("valid assignments");

        assert_eq!(map.cluster_count(), 2);
        assert_eq!(map.store_count(), 4);
        assert_eq!(map.unassigned_count(), 1);
        assert_eq!(map.cluster_size(&ClusterId("C1".to_string())), 2);
        assert_eq!(map.cluster_of(&StoreId("S4".to_string())), None);
    }

    #[test]
    fn rejects_store_in_two_clusters() {
        let error = ClusterMap::from_assignments(&[
            assign("S1", Some("C1")),
            assign("S1", Some("C2")),
        ])
        .expect_err("conflicting assignment should fail");

        assert!(matches!(error, EngineError::InvariantViolation(_)));
    }

    #[test]
    fn tolerates_duplicate_identical_rows() {
        let map = ClusterMap::from_assignments(&[
            assign("S1", Some("C1")),
            assign("S1", Some("C1")),
        ])
        .expect("duplicate rows are harmless");

        assert_eq!(map.cluster_size(&ClusterId("C1".to_string())), 1);
    }
}
