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

#![allow(dead_code)]

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use grouplag_lag::{Cluster, ConsumerMember, Error, GroupSummary, PartitionKey, Result};
use tracing::subscriber::DefaultGuard;
use tracing_subscriber::EnvFilter;

pub(crate) fn init_tracing() -> Result<DefaultGuard, Box<dyn std::error::Error>> {
    Ok(tracing::subscriber::set_default(
        tracing_subscriber::fmt()
            .with_level(true)
            .with_line_number(true)
            .with_thread_names(false)
            .with_target(true)
            .with_env_filter(
                EnvFilter::from_default_env().add_directive(
                    format!("{}=debug", env!("CARGO_PKG_NAME").replace("-", "_")).parse()?,
                ),
            )
            .with_test_writer()
            .finish(),
    ))
}

pub(crate) fn member(id: &str, assignment: &[(&str, i32)]) -> ConsumerMember {
    ConsumerMember::default()
        .member_id(format!("{id}-abc"))
        .client_id(id)
        .host("/127.0.0.1")
        .assignment(
            assignment
                .iter()
                .map(|(topic, partition)| PartitionKey::new(*topic, *partition)),
        )
}

/// a cluster answering from fixed state, recording the queries made of it
#[derive(Clone, Debug, Default)]
pub(crate) struct FakeCluster {
    pub(crate) summary: GroupSummary,
    pub(crate) log_start: BTreeMap<PartitionKey, i64>,
    pub(crate) log_end: BTreeMap<PartitionKey, i64>,
    pub(crate) committed: BTreeMap<PartitionKey, i64>,
    pub(crate) queries: Arc<Mutex<Vec<String>>>,
}

impl FakeCluster {
    pub(crate) fn summary(self, summary: GroupSummary) -> Self {
        Self { summary, ..self }
    }

    pub(crate) fn log_start(self, log_start: impl IntoIterator<Item = (PartitionKey, i64)>) -> Self {
        Self {
            log_start: log_start.into_iter().collect(),
            ..self
        }
    }

    pub(crate) fn log_end(self, log_end: impl IntoIterator<Item = (PartitionKey, i64)>) -> Self {
        Self {
            log_end: log_end.into_iter().collect(),
            ..self
        }
    }

    pub(crate) fn committed(self, committed: impl IntoIterator<Item = (PartitionKey, i64)>) -> Self {
        Self {
            committed: committed.into_iter().collect(),
            ..self
        }
    }

    pub(crate) fn queries(&self) -> Vec<String> {
        self.queries
            .lock()
            .map(|queries| queries.clone())
            .unwrap_or_default()
    }

    fn query(&self, query: &str) -> Result<()> {
        self.queries
            .lock()
            .map(|mut queries| queries.push(query.into()))
            .map_err(Into::into)
    }

    fn offsets(
        bounds: &BTreeMap<PartitionKey, i64>,
        partitions: &[PartitionKey],
    ) -> BTreeMap<PartitionKey, i64> {
        partitions
            .iter()
            .filter_map(|partition| {
                bounds
                    .get(partition)
                    .map(|offset| (partition.clone(), *offset))
            })
            .collect()
    }
}

#[async_trait]
impl Cluster for FakeCluster {
    async fn describe_group(&self, group: &str) -> Result<GroupSummary> {
        self.query(&format!("describe_group: {group}"))?;
        Ok(self.summary.clone())
    }

    async fn list_end_offsets(
        &self,
        partitions: &[PartitionKey],
    ) -> Result<BTreeMap<PartitionKey, i64>> {
        self.query("list_end_offsets")?;
        Ok(Self::offsets(&self.log_end, partitions))
    }

    async fn list_beginning_offsets(
        &self,
        partitions: &[PartitionKey],
    ) -> Result<BTreeMap<PartitionKey, i64>> {
        self.query("list_beginning_offsets")?;
        Ok(Self::offsets(&self.log_start, partitions))
    }

    async fn committed_offset(
        &self,
        group: &str,
        partition: &PartitionKey,
    ) -> Result<Option<i64>> {
        self.query(&format!("committed_offset: {group}, {partition}"))?;
        Ok(self.committed.get(partition).copied())
    }
}

/// a cluster that fails every query
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct Unreachable;

#[async_trait]
impl Cluster for Unreachable {
    async fn describe_group(&self, _group: &str) -> Result<GroupSummary> {
        Err(Error::Io(Arc::new(std::io::Error::from(
            std::io::ErrorKind::ConnectionRefused,
        ))))
    }

    async fn list_end_offsets(
        &self,
        _partitions: &[PartitionKey],
    ) -> Result<BTreeMap<PartitionKey, i64>> {
        unreachable!()
    }

    async fn list_beginning_offsets(
        &self,
        _partitions: &[PartitionKey],
    ) -> Result<BTreeMap<PartitionKey, i64>> {
        unreachable!()
    }

    async fn committed_offset(
        &self,
        _group: &str,
        _partition: &PartitionKey,
    ) -> Result<Option<i64>> {
        unreachable!()
    }
}
