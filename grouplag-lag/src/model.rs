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

use std::{collections::BTreeMap, convert::Infallible, fmt, str::FromStr};

use serde::{
    Deserialize, Deserializer, Serialize, Serializer,
    de::{self, Visitor},
};

/// a partition of a topic
#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct PartitionKey {
    pub topic: String,
    pub partition: i32,
}

impl PartitionKey {
    pub fn new(topic: impl Into<String>, partition: i32) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.topic, self.partition)
    }
}

/// an active member of a consumer group, with its assigned partitions
#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ConsumerMember {
    pub member_id: String,
    pub client_id: String,
    pub host: String,
    pub assignment: Vec<PartitionKey>,
}

impl ConsumerMember {
    pub fn member_id(self, member_id: impl Into<String>) -> Self {
        Self {
            member_id: member_id.into(),
            ..self
        }
    }

    pub fn client_id(self, client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            ..self
        }
    }

    pub fn host(self, host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..self
        }
    }

    pub fn assignment(self, assignment: impl IntoIterator<Item = PartitionKey>) -> Self {
        Self {
            assignment: assignment.into_iter().collect(),
            ..self
        }
    }
}

/// the state of a group, keeping the broker's text for states not known here
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum GroupState {
    Dead,
    Empty,
    Stable,
    PreparingRebalance,
    CompletingRebalance,
    Unknown(String),
}

impl Default for GroupState {
    fn default() -> Self {
        Self::Unknown(Self::UNKNOWN.into())
    }
}

impl GroupState {
    const COMPLETING_REBALANCE: &str = "CompletingRebalance";
    const DEAD: &str = "Dead";
    const EMPTY: &str = "Empty";
    const PREPARING_REBALANCE: &str = "PreparingRebalance";
    const STABLE: &str = "Stable";
    const UNKNOWN: &str = "Unknown";
}

impl AsRef<str> for GroupState {
    fn as_ref(&self) -> &str {
        match self {
            Self::CompletingRebalance => Self::COMPLETING_REBALANCE,
            Self::Dead => Self::DEAD,
            Self::Empty => Self::EMPTY,
            Self::PreparingRebalance => Self::PREPARING_REBALANCE,
            Self::Stable => Self::STABLE,
            Self::Unknown(state) => state.as_str(),
        }
    }
}

impl FromStr for GroupState {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            Self::COMPLETING_REBALANCE => Self::CompletingRebalance,
            Self::DEAD => Self::Dead,
            Self::EMPTY => Self::Empty,
            Self::PREPARING_REBALANCE => Self::PreparingRebalance,
            Self::STABLE => Self::Stable,
            otherwise => Self::Unknown(otherwise.into()),
        })
    }
}

impl fmt::Display for GroupState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_ref())
    }
}

/// a snapshot of a consumer group as described by its coordinator
#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct GroupSummary {
    pub state: GroupState,
    pub protocol_type: String,
    pub members: Vec<ConsumerMember>,
}

impl GroupSummary {
    pub fn state(self, state: GroupState) -> Self {
        Self { state, ..self }
    }

    pub fn protocol_type(self, protocol_type: impl Into<String>) -> Self {
        Self {
            protocol_type: protocol_type.into(),
            ..self
        }
    }

    pub fn members(self, members: impl IntoIterator<Item = ConsumerMember>) -> Self {
        Self {
            members: members.into_iter().collect(),
            ..self
        }
    }
}

/// an offset that may not be known, serialized as a number or "unknown"
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Offset {
    Known(i64),
    #[default]
    Unknown,
}

impl Offset {
    const UNKNOWN: &str = "unknown";

    pub fn known(self) -> Option<i64> {
        match self {
            Self::Known(offset) => Some(offset),
            Self::Unknown => None,
        }
    }
}

impl From<Option<i64>> for Offset {
    fn from(value: Option<i64>) -> Self {
        value.map_or(Self::Unknown, Self::Known)
    }
}

impl fmt::Display for Offset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Known(offset) => f.pad(&offset.to_string()),
            Self::Unknown => f.pad(Self::UNKNOWN),
        }
    }
}

impl Serialize for Offset {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Self::Known(offset) => serializer.serialize_i64(*offset),
            Self::Unknown => serializer.serialize_str(Self::UNKNOWN),
        }
    }
}

struct OffsetVisitor;

impl Visitor<'_> for OffsetVisitor {
    type Value = Offset;

    fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "an integer offset or \"{}\"", Offset::UNKNOWN)
    }

    fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        Ok(Offset::Known(v))
    }

    fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        i64::try_from(v)
            .map(Offset::Known)
            .map_err(|_| E::invalid_value(de::Unexpected::Unsigned(v), &self))
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        if v == Offset::UNKNOWN {
            Ok(Offset::Unknown)
        } else {
            Err(E::invalid_value(de::Unexpected::Str(v), &self))
        }
    }
}

impl<'de> Deserialize<'de> for Offset {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(OffsetVisitor)
    }
}

/// the member owning a partition
#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Owner {
    pub consumer_id: String,
    pub host: String,
    pub client_id: String,
}

impl From<&ConsumerMember> for Owner {
    fn from(value: &ConsumerMember) -> Self {
        Self {
            consumer_id: value.member_id.clone(),
            host: value.host.clone(),
            client_id: value.client_id.clone(),
        }
    }
}

/// lag and ownership of a single partition
#[derive(Clone, Debug, Default, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionState {
    pub log_start_offset: i64,
    pub log_end_offset: i64,
    pub partition: i32,
    pub current_offset: Offset,
    pub lag: Offset,
    pub consumer_id: Option<String>,
    pub host: Option<String>,
    pub client_id: Option<String>,
}

impl PartitionState {
    pub fn owner(&self) -> Option<Owner> {
        match (&self.consumer_id, &self.host, &self.client_id) {
            (Some(consumer_id), Some(host), Some(client_id)) => Some(Owner {
                consumer_id: consumer_id.clone(),
                host: host.clone(),
                client_id: client_id.clone(),
            }),
            _ => None,
        }
    }
}

/// lag by topic and partition, ordered by topic then partition
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Report(BTreeMap<String, BTreeMap<i32, PartitionState>>);

impl Report {
    pub fn insert(&mut self, topic: &str, state: PartitionState) -> Option<PartitionState> {
        self.0
            .entry(topic.to_owned())
            .or_default()
            .insert(state.partition, state)
    }

    pub fn get(&self, key: &PartitionKey) -> Option<&PartitionState> {
        self.0
            .get(&key.topic)
            .and_then(|partitions| partitions.get(&key.partition))
    }

    pub fn topics(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// every partition, ordered by topic then partition
    pub fn iter(&self) -> impl Iterator<Item = (&str, &PartitionState)> {
        self.0.iter().flat_map(|(topic, partitions)| {
            partitions
                .values()
                .map(move |state| (topic.as_str(), state))
        })
    }

    pub fn keys(&self) -> impl Iterator<Item = PartitionKey> + '_ {
        self.iter()
            .map(|(topic, state)| PartitionKey::new(topic, state.partition))
    }

    pub fn len(&self) -> usize {
        self.0.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
