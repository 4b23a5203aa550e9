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

use std::collections::BTreeMap;

use tracing::debug;

use crate::{Error, Offset, Ownership, PartitionKey, PartitionState, Report, Result};

/// offsets fetched from the cluster for the assigned partitions
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Offsets {
    pub log_start: BTreeMap<PartitionKey, i64>,
    pub log_end: BTreeMap<PartitionKey, i64>,
    pub committed: BTreeMap<PartitionKey, Option<i64>>,
}

impl Offsets {
    pub fn log_start(self, log_start: impl IntoIterator<Item = (PartitionKey, i64)>) -> Self {
        Self {
            log_start: log_start.into_iter().collect(),
            ..self
        }
    }

    pub fn log_end(self, log_end: impl IntoIterator<Item = (PartitionKey, i64)>) -> Self {
        Self {
            log_end: log_end.into_iter().collect(),
            ..self
        }
    }

    pub fn committed(
        self,
        committed: impl IntoIterator<Item = (PartitionKey, Option<i64>)>,
    ) -> Self {
        Self {
            committed: committed.into_iter().collect(),
            ..self
        }
    }

    fn bound(bounds: &BTreeMap<PartitionKey, i64>, partition: &PartitionKey) -> Result<i64> {
        bounds
            .get(partition)
            .copied()
            .ok_or_else(|| Error::MissingOffset(partition.clone()))
    }
}

/// Merge ownership and offsets into the lag of every partition.
///
/// A partition without a committed offset has an unknown current offset and
/// lag. Lag is not clamped, stale metadata may make it negative. A partition
/// without an owner has no owner fields.
pub fn aggregate<'a>(
    partitions: impl IntoIterator<Item = &'a PartitionKey>,
    ownership: &Ownership,
    offsets: &Offsets,
) -> Result<Report> {
    let mut report = Report::default();

    for partition in partitions {
        let log_start_offset = Offsets::bound(&offsets.log_start, partition)?;
        let log_end_offset = Offsets::bound(&offsets.log_end, partition)?;

        let committed = offsets.committed.get(partition).copied().flatten();
        let owner = ownership.owner(partition);

        let state = PartitionState {
            log_start_offset,
            log_end_offset,
            partition: partition.partition,
            current_offset: Offset::from(committed),
            lag: Offset::from(committed.map(|committed| log_end_offset - committed)),
            consumer_id: owner.map(|owner| owner.consumer_id.clone()),
            host: owner.map(|owner| owner.host.clone()),
            client_id: owner.map(|owner| owner.client_id.clone()),
        };

        debug!(%partition, ?state);

        _ = report.insert(&partition.topic, state);
    }

    Ok(report)
}
