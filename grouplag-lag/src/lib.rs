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

//! Grouplag Lag
//!
//! Report the lag of each partition assigned within a consumer group,
//! together with the member that owns it.

use std::{
    fmt,
    io::{self, Write},
    marker::PhantomData,
    process::{ExitCode, Termination},
    result,
    sync::{Arc, PoisonError},
};

use tracing::debug;
use url::Url;

mod aggregate;
mod assignment;
mod cluster;
mod model;
mod ownership;
mod present;

pub use aggregate::{Offsets, aggregate};
pub use assignment::MemberAssignment;
pub use cluster::{Cluster, Kafka};
pub use model::{
    ConsumerMember, GroupState, GroupSummary, Offset, Owner, PartitionKey, PartitionState, Report,
};
pub use ownership::Ownership;
pub use present::{Format, Presenter};

pub type Result<T, E = Error> = result::Result<T, E>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    Api { api_key: i16, error_code: i16 },
    Assignment(String),
    Client(#[from] grouplag_client::Error),
    Io(Arc<io::Error>),
    MissingOffset(PartitionKey),
    Poison,
    SerdeJson(#[from] serde_json::Error),
    UnknownLeader(PartitionKey),
    Url(#[from] url::ParseError),
}

impl<T> From<PoisonError<T>> for Error {
    fn from(_value: PoisonError<T>) -> Self {
        Self::Poison
    }
}

impl From<io::Error> for Error {
    fn from(value: io::Error) -> Self {
        Self::Io(Arc::new(value))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// what became of a request to report the lag of a group
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Outcome {
    Reported,
    GroupDead,
    GroupRebalancing,
}

impl Termination for Outcome {
    fn report(self) -> ExitCode {
        if self == Self::Reported {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        }
    }
}

/// the state of a group as found in the cluster
#[derive(Clone, Debug, PartialEq)]
pub enum Inspection {
    Dead,
    Rebalancing,
    Lag(Report),
}

/// Describe the group and, when it has members, fetch the offsets of every
/// assigned partition.
///
/// A dead or rebalancing group returns before any offsets are requested.
pub async fn inspect<C>(cluster: &C, group: &str) -> Result<Inspection>
where
    C: Cluster + ?Sized,
{
    let summary = cluster.describe_group(group).await?;
    debug!(group, state = %summary.state, members = summary.members.len());

    if summary.state == GroupState::Dead {
        return Ok(Inspection::Dead);
    }

    if summary.members.is_empty() {
        return Ok(Inspection::Rebalancing);
    }

    let ownership = Ownership::resolve(&summary.members);
    let partitions = ownership.partitions().cloned().collect::<Vec<_>>();

    let offsets = Offsets::default()
        .log_end(cluster.list_end_offsets(&partitions).await?)
        .log_start(cluster.list_beginning_offsets(&partitions).await?)
        .committed(cluster.committed_offsets(group, &partitions).await?);

    aggregate(&partitions, &ownership, &offsets).map(Inspection::Lag)
}

#[derive(Clone, Debug, Default)]
pub struct Builder<B, G> {
    broker: B,
    group: G,
    json: bool,
    include_start_offset: bool,
}

impl<B, G> Builder<B, G> {
    pub fn broker(self, broker: Url) -> Builder<Url, G> {
        Builder {
            broker,
            group: self.group,
            json: self.json,
            include_start_offset: self.include_start_offset,
        }
    }

    pub fn group(self, group: impl Into<String>) -> Builder<B, String> {
        Builder {
            broker: self.broker,
            group: group.into(),
            json: self.json,
            include_start_offset: self.include_start_offset,
        }
    }

    pub fn json(self, json: bool) -> Self {
        Self { json, ..self }
    }

    pub fn include_start_offset(self, include_start_offset: bool) -> Self {
        Self {
            include_start_offset,
            ..self
        }
    }
}

impl Builder<Url, String> {
    pub fn build(self) -> Lag {
        Lag {
            configuration: Configuration {
                broker: self.broker,
                group: self.group,
                json: self.json,
                include_start_offset: self.include_start_offset,
            },
        }
    }
}

#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Configuration {
    broker: Url,
    group: String,
    json: bool,
    include_start_offset: bool,
}

#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Lag {
    configuration: Configuration,
}

impl TryFrom<Configuration> for Lag {
    type Error = Error;

    fn try_from(configuration: Configuration) -> Result<Self, Self::Error> {
        Ok(Self { configuration })
    }
}

impl Lag {
    pub fn builder() -> Builder<PhantomData<Url>, PhantomData<String>> {
        Builder::default()
    }

    pub fn presenter(&self) -> Presenter {
        Presenter::new(self.configuration.group.as_str())
            .format(if self.configuration.json {
                Format::Json
            } else {
                Format::Table
            })
            .include_start_offset(self.configuration.include_start_offset)
    }

    /// inspect the group in the cluster and render the result
    pub async fn report<C, W>(&self, cluster: &C, out: &mut W) -> Result<Outcome>
    where
        C: Cluster + ?Sized,
        W: Write,
    {
        let presenter = self.presenter();

        match inspect(cluster, &self.configuration.group).await? {
            Inspection::Dead => presenter
                .group_dead(out)
                .and(Ok(Outcome::GroupDead)),

            Inspection::Rebalancing => presenter
                .group_rebalancing(out)
                .and(Ok(Outcome::GroupRebalancing)),

            Inspection::Lag(report) => presenter
                .report(&report, out)
                .and(Ok(Outcome::Reported)),
        }
    }

    pub async fn main(self) -> Result<Outcome> {
        let cluster = Kafka::connect(
            self.configuration.broker.clone(),
            Some(env!("CARGO_PKG_NAME").into()),
        )
        .await?;

        let mut out = io::stdout();

        self.report(&cluster, &mut out)
            .await
            .and_then(|outcome| out.flush().map_err(Into::into).and(Ok(outcome)))
    }
}
