// Copyright ⓒ 2024-2025 Peter Morgan <peter.james.morgan@gmail.com>
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, warn};

use crate::{ConsumerMember, Owner, PartitionKey};

/// which member owns each partition assigned within a group
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Ownership {
    owners: BTreeMap<PartitionKey, Owner>,
    contested: BTreeSet<PartitionKey>,
}

impl Ownership {
    /// Map every assigned partition to its owning member.
    ///
    /// A partition claimed by more than one member is owned by the last
    /// member claiming it, and is also reported by [`Ownership::contested`].
    pub fn resolve(members: &[ConsumerMember]) -> Self {
        let mut ownership = Self::default();

        for member in members {
            let owner = Owner::from(member);

            for partition in &member.assignment {
                if let Some(previous) = ownership
                    .owners
                    .insert(partition.clone(), owner.clone())
                    .filter(|previous| previous != &owner)
                {
                    warn!(%partition, previous = %previous.consumer_id, current = %owner.consumer_id);
                    _ = ownership.contested.insert(partition.clone());
                }
            }
        }

        debug!(partitions = ownership.owners.len(), contested = ownership.contested.len());

        ownership
    }

    /// the union of partitions assigned across all members, ordered
    pub fn partitions(&self) -> impl Iterator<Item = &PartitionKey> {
        self.owners.keys()
    }

    pub fn owner(&self, partition: &PartitionKey) -> Option<&Owner> {
        self.owners.get(partition)
    }

    /// partitions claimed by more than one member
    pub fn contested(&self) -> impl Iterator<Item = &PartitionKey> {
        self.contested.iter()
    }

    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }
}
