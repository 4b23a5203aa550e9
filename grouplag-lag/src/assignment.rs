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

//! Consumer protocol member assignment, as carried in the
//! `member_assignment` of a described group member.

use std::collections::BTreeMap;

use bytes::{Buf as _, BufMut as _, Bytes, BytesMut};
use kafka_protocol::{
    messages::{
        ConsumerProtocolAssignment, TopicName, consumer_protocol_assignment::TopicPartition,
    },
    protocol::{Decodable as _, Encodable as _, Message as _, StrBytes},
};
use tracing::debug;

use crate::{Error, PartitionKey, Result};

pub const CONSUMER: &str = "consumer";

#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct MemberAssignment {
    pub version: i16,
    pub assigned_partitions: Vec<PartitionKey>,
}

impl MemberAssignment {
    pub fn version(self, version: i16) -> Self {
        Self { version, ..self }
    }

    pub fn assigned_partitions(
        self,
        assigned_partitions: impl IntoIterator<Item = PartitionKey>,
    ) -> Self {
        Self {
            assigned_partitions: assigned_partitions.into_iter().collect(),
            ..self
        }
    }

    /// the version prefixed encoding, without user data
    pub fn encode(&self) -> Result<Bytes> {
        let mut topics = BTreeMap::<&str, Vec<i32>>::new();

        for partition in &self.assigned_partitions {
            topics
                .entry(partition.topic.as_str())
                .or_default()
                .push(partition.partition);
        }

        let assignment = ConsumerProtocolAssignment::default().with_assigned_partitions(
            topics
                .into_iter()
                .map(|(topic, partitions)| {
                    TopicPartition::default()
                        .with_topic(TopicName(StrBytes::from_string(topic.into())))
                        .with_partitions(partitions)
                })
                .collect(),
        );

        let mut encoded = BytesMut::new();
        encoded.put_i16(self.version);

        assignment
            .encode(&mut encoded, self.version)
            .map_err(|err| Error::Assignment(err.to_string()))
            .and(Ok(encoded.freeze()))
    }
}

/// a member that has not been assigned partitions carries no bytes
impl TryFrom<Bytes> for MemberAssignment {
    type Error = Error;

    fn try_from(mut value: Bytes) -> Result<Self, Self::Error> {
        if value.is_empty() {
            return Ok(Self::default());
        }

        let version = value
            .try_get_i16()
            .map_err(|err| Error::Assignment(err.to_string()))?;

        // later versions only append fields
        let decoded = ConsumerProtocolAssignment::decode(
            &mut value,
            version.min(ConsumerProtocolAssignment::VERSIONS.max),
        )
        .inspect(|decoded| debug!(version, ?decoded))
        .map_err(|err| Error::Assignment(err.to_string()))?;

        Ok(Self {
            version,
            assigned_partitions: decoded
                .assigned_partitions
                .into_iter()
                .flat_map(|topic| {
                    let name = topic.topic.0.to_string();

                    topic
                        .partitions
                        .into_iter()
                        .map(move |partition| PartitionKey::new(name.clone(), partition))
                })
                .collect(),
        })
    }
}
