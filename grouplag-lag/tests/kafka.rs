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

use bytes::{Buf as _, BufMut as _, Bytes, BytesMut};
use common::init_tracing;
use grouplag_lag::{
    Cluster, GroupState, Inspection, Kafka, Lag, Offset, Outcome, PartitionKey, inspect,
};
use kafka_protocol::{
    messages::{
        ApiKey, ApiVersionsResponse, BrokerId, ConsumerProtocolAssignment, DescribeGroupsRequest,
        DescribeGroupsResponse,
        FindCoordinatorResponse, ListOffsetsRequest, ListOffsetsResponse,
        MetadataRequest, MetadataResponse, OffsetFetchRequest, OffsetFetchResponse,
        RequestHeader, ResponseHeader,
        TopicName,
        api_versions_response::ApiVersion,
        consumer_protocol_assignment::TopicPartition,
        describe_groups_response::{DescribedGroup, DescribedGroupMember},
        list_offsets_response::{ListOffsetsPartitionResponse, ListOffsetsTopicResponse},
        metadata_response::{MetadataResponseBroker, MetadataResponsePartition, MetadataResponseTopic},
        offset_fetch_response::{OffsetFetchResponsePartition, OffsetFetchResponseTopic},
    },
    protocol::{Decodable, Encodable, StrBytes},
};
use pretty_assertions::assert_eq;
use tokio::{
    io::{AsyncReadExt as _, AsyncWriteExt as _},
    net::{TcpListener, TcpStream},
};
use url::Url;

pub mod common;

const NODE_ID: i32 = 1001;

fn supports(api_key: ApiKey, min_version: i16, max_version: i16) -> ApiVersion {
    ApiVersion::default()
        .with_api_key(api_key as i16)
        .with_min_version(min_version)
        .with_max_version(max_version)
}

fn respond<R: Encodable>(
    api_key: ApiKey,
    api_version: i16,
    correlation_id: i32,
    response: &R,
) -> anyhow::Result<Bytes> {
    let mut buffer = BytesMut::new();
    buffer.put_i32(0);

    ResponseHeader::default()
        .with_correlation_id(correlation_id)
        .encode(&mut buffer, api_key.response_header_version(api_version))?;
    response.encode(&mut buffer, api_version)?;

    let length = (buffer.len() - 4) as i32;
    buffer[..4].copy_from_slice(&length.to_be_bytes());
    Ok(buffer.freeze())
}

/// the state held by a single broker cluster
#[derive(Clone, Debug)]
struct State {
    port: u16,
    group: &'static str,
    group_state: &'static str,
    assignment: Bytes,
    log_start: BTreeMap<i32, i64>,
    log_end: BTreeMap<i32, i64>,
    committed: BTreeMap<i32, i64>,
}

fn str_bytes(s: impl Into<String>) -> StrBytes {
    StrBytes::from_string(s.into())
}

fn describe_groups(state: &State, request: DescribeGroupsRequest) -> DescribeGroupsResponse {
    DescribeGroupsResponse::default().with_groups(
        request
            .groups
            .into_iter()
            .map(|group_id| {
                if group_id.0.to_string() == state.group {
                    DescribedGroup::default()
                        .with_group_id(group_id)
                        .with_group_state(str_bytes(state.group_state))
                        .with_protocol_type(str_bytes("consumer"))
                        .with_protocol_data(str_bytes("range"))
                        .with_members(vec![
                            DescribedGroupMember::default()
                                .with_member_id(str_bytes("consumer-1-abc"))
                                .with_client_id(str_bytes("consumer-1"))
                                .with_client_host(str_bytes("/127.0.0.1"))
                                .with_member_assignment(state.assignment.clone()),
                        ])
                } else {
                    DescribedGroup::default()
                        .with_group_id(group_id)
                        .with_error_code(69)
                }
            })
            .collect(),
    )
}

fn metadata(state: &State, request: MetadataRequest) -> MetadataResponse {
    MetadataResponse::default()
        .with_brokers(vec![
            MetadataResponseBroker::default()
                .with_node_id(BrokerId(NODE_ID))
                .with_host(str_bytes("127.0.0.1"))
                .with_port(state.port.into()),
        ])
        .with_topics(
            request
                .topics
                .unwrap_or_default()
                .into_iter()
                .map(|topic| {
                    MetadataResponseTopic::default()
                        .with_name(topic.name)
                        .with_partitions(
                            state
                                .log_end
                                .keys()
                                .map(|partition| {
                                    MetadataResponsePartition::default()
                                        .with_partition_index(*partition)
                                        .with_leader_id(BrokerId(NODE_ID))
                                })
                                .collect(),
                        )
                })
                .collect(),
        )
}

fn list_offsets(state: &State, request: ListOffsetsRequest) -> ListOffsetsResponse {
    ListOffsetsResponse::default().with_topics(
        request
            .topics
            .into_iter()
            .map(|topic| {
                ListOffsetsTopicResponse::default()
                    .with_name(topic.name)
                    .with_partitions(
                        topic
                            .partitions
                            .into_iter()
                            .map(|partition| {
                                let offsets = if partition.timestamp == -2 {
                                    &state.log_start
                                } else {
                                    &state.log_end
                                };

                                ListOffsetsPartitionResponse::default()
                                    .with_partition_index(partition.partition_index)
                                    .with_timestamp(partition.timestamp)
                                    .with_offset(
                                        offsets
                                            .get(&partition.partition_index)
                                            .copied()
                                            .unwrap_or(-1),
                                    )
                            })
                            .collect(),
                    )
            })
            .collect(),
    )
}

fn offset_fetch(state: &State, request: OffsetFetchRequest) -> OffsetFetchResponse {
    OffsetFetchResponse::default().with_topics(
        request
            .topics
            .unwrap_or_default()
            .into_iter()
            .map(|topic| {
                OffsetFetchResponseTopic::default()
                    .with_name(topic.name)
                    .with_partitions(
                        topic
                            .partition_indexes
                            .into_iter()
                            .map(|partition_index| {
                                OffsetFetchResponsePartition::default()
                                    .with_partition_index(partition_index)
                                    .with_committed_offset(
                                        state
                                            .committed
                                            .get(&partition_index)
                                            .copied()
                                            .unwrap_or(-1),
                                    )
                            })
                            .collect(),
                    )
            })
            .collect(),
    )
}

async fn serve(state: State, mut stream: TcpStream) -> anyhow::Result<()> {
    loop {
        let Ok(length) = stream.read_i32().await else {
            return Ok(());
        };

        let mut buffer = vec![0u8; length as usize];
        _ = stream.read_exact(&mut buffer).await?;
        let mut encoded = Bytes::from(buffer);

        let api_key = ApiKey::try_from(encoded.clone().get_i16())
            .map_err(|_| anyhow::anyhow!("unknown api key"))?;
        let api_version = encoded.slice(2..4).get_i16();

        let header =
            RequestHeader::decode(&mut encoded, api_key.request_header_version(api_version))?;
        let correlation_id = header.correlation_id;

        let payload = match api_key {
            ApiKey::ApiVersions => respond(
                api_key,
                api_version,
                correlation_id,
                &ApiVersionsResponse::default().with_api_keys(vec![
                    supports(ApiKey::ApiVersions, 0, 3),
                    supports(ApiKey::Metadata, 0, 12),
                    supports(ApiKey::FindCoordinator, 0, 4),
                    supports(ApiKey::DescribeGroups, 0, 5),
                    supports(ApiKey::ListOffsets, 0, 8),
                    supports(ApiKey::OffsetFetch, 0, 8),
                ]),
            )?,

            ApiKey::FindCoordinator => respond(
                api_key,
                api_version,
                correlation_id,
                &FindCoordinatorResponse::default()
                    .with_node_id(BrokerId(NODE_ID))
                    .with_host(str_bytes("127.0.0.1"))
                    .with_port(state.port.into()),
            )?,

            ApiKey::DescribeGroups => respond(
                api_key,
                api_version,
                correlation_id,
                &describe_groups(
                    &state,
                    DescribeGroupsRequest::decode(&mut encoded, api_version)?,
                ),
            )?,

            ApiKey::Metadata => respond(
                api_key,
                api_version,
                correlation_id,
                &metadata(&state, MetadataRequest::decode(&mut encoded, api_version)?),
            )?,

            ApiKey::ListOffsets => respond(
                api_key,
                api_version,
                correlation_id,
                &list_offsets(
                    &state,
                    ListOffsetsRequest::decode(&mut encoded, api_version)?,
                ),
            )?,

            ApiKey::OffsetFetch => respond(
                api_key,
                api_version,
                correlation_id,
                &offset_fetch(
                    &state,
                    OffsetFetchRequest::decode(&mut encoded, api_version)?,
                ),
            )?,

            otherwise => anyhow::bail!("unexpected: {otherwise:?}"),
        };

        stream.write_all(&payload[..]).await?;
    }
}

/// member assignment as written by a java consumer: version, then the body
fn assignment(version: i16, topic: &'static str, partitions: &[i32]) -> anyhow::Result<Bytes> {
    let mut encoded = BytesMut::new();
    encoded.put_i16(version);

    ConsumerProtocolAssignment::default()
        .with_assigned_partitions(vec![
            TopicPartition::default()
                .with_topic(TopicName(StrBytes::from_static_str(topic)))
                .with_partitions(partitions.to_vec()),
        ])
        .encode(&mut encoded, version)?;

    Ok(encoded.freeze())
}

/// a consumer group g1 with one member assigned t-0 and t-1
async fn broker(group_state: &'static str) -> anyhow::Result<Url> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();

    let state = State {
        port,
        group: "g1",
        group_state,
        assignment: assignment(0, "t", &[0, 1])?,
        log_start: BTreeMap::from([(0, 0), (1, 0)]),
        log_end: BTreeMap::from([(0, 100), (1, 50)]),
        committed: BTreeMap::from([(0, 80)]),
    };

    _ = tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            _ = tokio::spawn(serve(state.clone(), stream));
        }
    });

    Url::parse(&format!("tcp://127.0.0.1:{port}")).map_err(Into::into)
}

#[tokio::test]
async fn describe_group() -> anyhow::Result<()> {
    let _guard = init_tracing().map_err(|err| anyhow::anyhow!("{err}"))?;

    let kafka = Kafka::connect(broker("Stable").await?, Some("grouplag".into())).await?;

    let summary = kafka.describe_group("g1").await?;
    assert_eq!(GroupState::Stable, summary.state);
    assert_eq!("consumer", summary.protocol_type);
    assert_eq!(1, summary.members.len());
    assert_eq!(
        vec![PartitionKey::new("t", 0), PartitionKey::new("t", 1)],
        summary.members[0].assignment
    );

    assert_eq!(GroupState::Dead, kafka.describe_group("g2").await?.state);

    Ok(())
}

#[tokio::test]
async fn offsets() -> anyhow::Result<()> {
    let _guard = init_tracing().map_err(|err| anyhow::anyhow!("{err}"))?;

    let kafka = Kafka::connect(broker("Stable").await?, None).await?;
    let partitions = [PartitionKey::new("t", 0), PartitionKey::new("t", 1)];

    assert_eq!(
        BTreeMap::from([(partitions[0].clone(), 100), (partitions[1].clone(), 50)]),
        kafka.list_end_offsets(&partitions).await?
    );

    assert_eq!(
        BTreeMap::from([(partitions[0].clone(), 0), (partitions[1].clone(), 0)]),
        kafka.list_beginning_offsets(&partitions).await?
    );

    assert_eq!(
        BTreeMap::from([(partitions[0].clone(), Some(80)), (partitions[1].clone(), None)]),
        kafka.committed_offsets("g1", &partitions).await?
    );

    assert_eq!(Some(80), kafka.committed_offset("g1", &partitions[0]).await?);

    Ok(())
}

#[tokio::test]
async fn report() -> anyhow::Result<()> {
    let _guard = init_tracing().map_err(|err| anyhow::anyhow!("{err}"))?;

    let broker = broker("Stable").await?;
    let kafka = Kafka::connect(broker.clone(), None).await?;

    let Inspection::Lag(report) = inspect(&kafka, "g1").await? else {
        panic!("expecting lag")
    };

    let zero = report
        .get(&PartitionKey::new("t", 0))
        .ok_or_else(|| anyhow::anyhow!("t-0"))?;
    assert_eq!(Offset::Known(20), zero.lag);

    let one = report
        .get(&PartitionKey::new("t", 1))
        .ok_or_else(|| anyhow::anyhow!("t-1"))?;
    assert_eq!(Offset::Unknown, one.lag);

    let mut out = Vec::new();
    let outcome = Lag::builder()
        .broker(broker)
        .group("g2")
        .build()
        .report(&kafka, &mut out)
        .await?;

    assert_eq!(Outcome::GroupDead, outcome);
    assert_eq!("Consumer group g2 does not exist.\n", String::from_utf8(out)?);

    Ok(())
}
