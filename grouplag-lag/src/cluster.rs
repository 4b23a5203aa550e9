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

use std::{
    collections::BTreeMap,
    fmt::Debug,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use grouplag_client::{Client, Manager};
use kafka_protocol::{
    messages::{
        ApiKey, BrokerId, DescribeGroupsRequest, DescribeGroupsResponse, FindCoordinatorRequest,
        GroupId, ListOffsetsRequest, MetadataRequest, MetadataResponse, OffsetFetchRequest,
        TopicName,
        describe_groups_response::{DescribedGroup, DescribedGroupMember},
        list_offsets_request::{ListOffsetsPartition, ListOffsetsTopic},
        metadata_request::MetadataRequestTopic,
        offset_fetch_request::OffsetFetchRequestTopic,
    },
    protocol::StrBytes,
};
use tracing::debug;
use url::Url;

use crate::{
    ConsumerMember, Error, GroupState, GroupSummary, PartitionKey, Result,
    assignment::{CONSUMER, MemberAssignment},
};

const NONE: i16 = 0;
const GROUP_ID_NOT_FOUND: i16 = 69;

const KEY_TYPE_GROUP: i8 = 0;
const READ_UNCOMMITTED: i8 = 0;
const CONSUMER_REPLICA: i32 = -1;
const NO_LEADER_EPOCH: i32 = -1;

const LATEST_TIMESTAMP: i64 = -1;
const EARLIEST_TIMESTAMP: i64 = -2;

/// cluster queries needed to report the lag of a consumer group
#[async_trait]
pub trait Cluster: Debug + Send + Sync {
    async fn describe_group(&self, group: &str) -> Result<GroupSummary>;

    /// the offset of the next message to be produced, for each partition
    async fn list_end_offsets(
        &self,
        partitions: &[PartitionKey],
    ) -> Result<BTreeMap<PartitionKey, i64>>;

    /// the earliest offset still retained, for each partition
    async fn list_beginning_offsets(
        &self,
        partitions: &[PartitionKey],
    ) -> Result<BTreeMap<PartitionKey, i64>>;

    /// the offset committed by the group, none when it has never committed
    async fn committed_offset(&self, group: &str, partition: &PartitionKey)
    -> Result<Option<i64>>;

    async fn committed_offsets(
        &self,
        group: &str,
        partitions: &[PartitionKey],
    ) -> Result<BTreeMap<PartitionKey, Option<i64>>> {
        let mut committed = BTreeMap::new();

        for partition in partitions {
            _ = committed.insert(
                partition.clone(),
                self.committed_offset(group, partition).await?,
            );
        }

        Ok(committed)
    }
}

/// a cluster reached through a bootstrap broker
#[derive(Clone, Debug)]
pub struct Kafka {
    bootstrap: Client,
    client_id: Option<String>,
    brokers: Arc<Mutex<BTreeMap<Url, Client>>>,
}

impl Kafka {
    pub async fn connect(broker: Url, client_id: Option<String>) -> Result<Self> {
        Manager::builder(broker)
            .client_id(client_id.clone())
            .build()
            .await
            .inspect(|pool| debug!(?pool))
            .map(Client::new)
            .map(|bootstrap| Self {
                bootstrap,
                client_id,
                brokers: Arc::new(Mutex::new(BTreeMap::new())),
            })
            .map_err(Into::into)
    }

    /// a client for the broker, reusing any earlier connection
    async fn broker(&self, broker: Url) -> Result<Client> {
        if &broker == self.bootstrap.broker() {
            return Ok(self.bootstrap.clone());
        }

        let cached = self.brokers.lock()?.get(&broker).cloned();

        if let Some(client) = cached {
            return Ok(client);
        }

        let client = Manager::builder(broker.clone())
            .client_id(self.client_id.clone())
            .build()
            .await
            .map(Client::new)?;

        Ok(self
            .brokers
            .lock()?
            .entry(broker)
            .or_insert(client)
            .clone())
    }

    async fn coordinator(&self, group: &str) -> Result<Client> {
        let response = self
            .bootstrap
            .call(
                FindCoordinatorRequest::default()
                    .with_key(StrBytes::from_string(group.into()))
                    .with_key_type(KEY_TYPE_GROUP),
            )
            .await?;

        if response.error_code != NONE {
            return Err(Error::Api {
                api_key: ApiKey::FindCoordinator as i16,
                error_code: response.error_code,
            });
        }

        let coordinator = broker_url(&response.host, response.port)?;
        debug!(group, %coordinator);

        self.broker(coordinator).await
    }

    /// the leader of each partition
    async fn leaders(&self, partitions: &[PartitionKey]) -> Result<BTreeMap<PartitionKey, Url>> {
        let topics = topics(partitions)
            .into_keys()
            .map(|topic| {
                MetadataRequestTopic::default()
                    .with_name(Some(TopicName(StrBytes::from_string(topic))))
            })
            .collect::<Vec<_>>();

        let MetadataResponse {
            brokers, topics, ..
        } = self
            .bootstrap
            .call(
                MetadataRequest::default()
                    .with_topics(Some(topics))
                    .with_allow_auto_topic_creation(false),
            )
            .await?;

        let brokers = brokers
            .into_iter()
            .map(|broker| broker_url(&broker.host, broker.port).map(|url| (broker.node_id, url)))
            .collect::<Result<BTreeMap<BrokerId, Url>>>()?;

        let mut leaders = BTreeMap::new();

        for topic in topics {
            if topic.error_code != NONE {
                return Err(Error::Api {
                    api_key: ApiKey::Metadata as i16,
                    error_code: topic.error_code,
                });
            }

            let Some(name) = topic.name.map(|name| name.0.to_string()) else {
                continue;
            };

            for partition in topic.partitions {
                let key = PartitionKey::new(name.clone(), partition.partition_index);

                if !partitions.contains(&key) {
                    continue;
                }

                if partition.error_code != NONE {
                    return Err(Error::Api {
                        api_key: ApiKey::Metadata as i16,
                        error_code: partition.error_code,
                    });
                }

                let leader = brokers
                    .get(&partition.leader_id)
                    .cloned()
                    .ok_or_else(|| Error::UnknownLeader(key.clone()))?;

                _ = leaders.insert(key, leader);
            }
        }

        debug!(?leaders);

        Ok(leaders)
    }

    /// offsets at a timestamp, asking the leader of each partition
    async fn list_offsets(
        &self,
        partitions: &[PartitionKey],
        timestamp: i64,
    ) -> Result<BTreeMap<PartitionKey, i64>> {
        let mut by_leader = BTreeMap::<Url, Vec<PartitionKey>>::new();

        for (partition, leader) in self.leaders(partitions).await? {
            by_leader.entry(leader).or_default().push(partition);
        }

        let mut offsets = BTreeMap::new();

        for (leader, partitions) in by_leader {
            let request = ListOffsetsRequest::default()
                .with_replica_id(BrokerId(CONSUMER_REPLICA))
                .with_isolation_level(READ_UNCOMMITTED)
                .with_topics(
                    topics(&partitions)
                        .into_iter()
                        .map(|(topic, partitions)| {
                            ListOffsetsTopic::default()
                                .with_name(TopicName(StrBytes::from_string(topic)))
                                .with_partitions(
                                    partitions
                                        .into_iter()
                                        .map(|partition| {
                                            ListOffsetsPartition::default()
                                                .with_partition_index(partition)
                                                .with_current_leader_epoch(NO_LEADER_EPOCH)
                                                .with_timestamp(timestamp)
                                        })
                                        .collect(),
                                )
                        })
                        .collect(),
                );

            let response = self.broker(leader).await?.call(request).await?;

            for topic in response.topics {
                for partition in topic.partitions {
                    if partition.error_code != NONE {
                        return Err(Error::Api {
                            api_key: ApiKey::ListOffsets as i16,
                            error_code: partition.error_code,
                        });
                    }

                    _ = offsets.insert(
                        PartitionKey::new(topic.name.0.to_string(), partition.partition_index),
                        partition.offset,
                    );
                }
            }
        }

        debug!(timestamp, ?offsets);

        Ok(offsets)
    }
}

#[async_trait]
impl Cluster for Kafka {
    async fn describe_group(&self, group: &str) -> Result<GroupSummary> {
        let DescribeGroupsResponse { groups, .. } = self
            .coordinator(group)
            .await?
            .call(
                DescribeGroupsRequest::default()
                    .with_groups(vec![GroupId(StrBytes::from_string(group.into()))]),
            )
            .await?;

        let Some(described) = groups
            .into_iter()
            .find(|described| described.group_id.0.to_string() == group)
        else {
            return Ok(GroupSummary::default().state(GroupState::Dead));
        };

        let summary = match described.error_code {
            NONE => summary(described)?,
            GROUP_ID_NOT_FOUND => GroupSummary::default().state(GroupState::Dead),
            error_code => {
                return Err(Error::Api {
                    api_key: ApiKey::DescribeGroups as i16,
                    error_code,
                });
            }
        };

        debug!(?summary);

        Ok(summary)
    }

    async fn list_end_offsets(
        &self,
        partitions: &[PartitionKey],
    ) -> Result<BTreeMap<PartitionKey, i64>> {
        self.list_offsets(partitions, LATEST_TIMESTAMP).await
    }

    async fn list_beginning_offsets(
        &self,
        partitions: &[PartitionKey],
    ) -> Result<BTreeMap<PartitionKey, i64>> {
        self.list_offsets(partitions, EARLIEST_TIMESTAMP).await
    }

    async fn committed_offset(
        &self,
        group: &str,
        partition: &PartitionKey,
    ) -> Result<Option<i64>> {
        self.committed_offsets(group, std::slice::from_ref(partition))
            .await
            .map(|mut committed| committed.remove(partition).flatten())
    }

    async fn committed_offsets(
        &self,
        group: &str,
        partitions: &[PartitionKey],
    ) -> Result<BTreeMap<PartitionKey, Option<i64>>> {
        let request = OffsetFetchRequest::default()
            .with_group_id(GroupId(StrBytes::from_string(group.into())))
            .with_topics(Some(
                topics(partitions)
                    .into_iter()
                    .map(|(topic, partitions)| {
                        OffsetFetchRequestTopic::default()
                            .with_name(TopicName(StrBytes::from_string(topic)))
                            .with_partition_indexes(partitions)
                    })
                    .collect(),
            ));

        let response = self.coordinator(group).await?.call(request).await?;

        if response.error_code != NONE {
            return Err(Error::Api {
                api_key: ApiKey::OffsetFetch as i16,
                error_code: response.error_code,
            });
        }

        let mut committed = BTreeMap::new();

        for topic in response.topics {
            for partition in topic.partitions {
                if partition.error_code != NONE {
                    return Err(Error::Api {
                        api_key: ApiKey::OffsetFetch as i16,
                        error_code: partition.error_code,
                    });
                }

                _ = committed.insert(
                    PartitionKey::new(topic.name.0.to_string(), partition.partition_index),
                    Some(partition.committed_offset).filter(|offset| *offset >= 0),
                );
            }
        }

        debug!(group, ?committed);

        Ok(committed)
    }
}

fn broker_url(host: &StrBytes, port: i32) -> Result<Url> {
    Url::parse(&format!("tcp://{host}:{port}")).map_err(Into::into)
}

/// partitions grouped by topic, each ordered by index
fn topics(partitions: &[PartitionKey]) -> BTreeMap<String, Vec<i32>> {
    let mut topics = BTreeMap::<String, Vec<i32>>::new();

    for partition in partitions {
        topics
            .entry(partition.topic.clone())
            .or_default()
            .push(partition.partition);
    }

    for indexes in topics.values_mut() {
        indexes.sort_unstable();
        indexes.dedup();
    }

    topics
}

fn summary(described: DescribedGroup) -> Result<GroupSummary> {
    let Ok(state) = described.group_state.to_string().parse::<GroupState>();
    let protocol_type = described.protocol_type.to_string();
    let consumer = protocol_type == CONSUMER;

    described
        .members
        .into_iter()
        .map(|member| self::member(member, consumer))
        .collect::<Result<Vec<_>>>()
        .map(|members| {
            GroupSummary::default()
                .state(state)
                .protocol_type(protocol_type)
                .members(members)
        })
}

/// only members using the consumer protocol carry partition assignments
fn member(member: DescribedGroupMember, consumer: bool) -> Result<ConsumerMember> {
    let assignment = if consumer {
        MemberAssignment::try_from(member.member_assignment)?.assigned_partitions
    } else {
        vec![]
    };

    Ok(ConsumerMember::default()
        .member_id(member.member_id.to_string())
        .client_id(member.client_id.to_string())
        .host(member.client_host.to_string())
        .assignment(assignment))
}
