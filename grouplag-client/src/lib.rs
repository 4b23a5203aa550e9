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

//! Grouplag Client
//!
//! Kafka API client: a managed connection per broker, API version
//! negotiation and request/response framing over `kafka-protocol`.

use std::{
    collections::BTreeMap,
    fmt, io,
    net::SocketAddr,
    sync::{Arc, LazyLock},
};

use bytes::{BufMut as _, Bytes, BytesMut};
use deadpool::managed::{self, BuildError, PoolError};
use kafka_protocol::{
    messages::{ApiKey, ApiVersionsRequest, RequestHeader, ResponseHeader},
    protocol::{Decodable, Encodable, Request, StrBytes},
};
use tokio::{
    io::{AsyncReadExt as _, AsyncWriteExt as _},
    net::{TcpStream, lookup_host},
};
use tracing::{Instrument, Level, debug, error, span};
use url::Url;

const MAX_FRAME_LENGTH: usize = 104_857_600;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    Codec(anyhow::Error),
    CorrelationId { expected: i32, received: i32 },
    DeadPoolBuild(#[from] BuildError),
    FrameLength(i64),
    Io(Arc<io::Error>),
    Message(String),
    Pool(Box<dyn std::error::Error + Send + Sync>),
    UnknownApiKey(i16),
    UnknownHost(Url),
    UnsupportedVersion(i16),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Message(msg) => write!(f, "{msg}"),
            error => write!(f, "{error:?}"),
        }
    }
}

impl<E> From<PoolError<E>> for Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn from(value: PoolError<E>) -> Self {
        Self::Pool(Box::new(value))
    }
}

impl From<io::Error> for Error {
    fn from(value: io::Error) -> Self {
        Self::Io(Arc::new(value))
    }
}

impl From<anyhow::Error> for Error {
    fn from(value: anyhow::Error) -> Self {
        Self::Codec(value)
    }
}

/// inclusive version ranges of the requests this client knows how to build
static SUPPORTED_API_VERSIONS: LazyLock<BTreeMap<i16, (i16, i16)>> = LazyLock::new(|| {
    BTreeMap::from([
        (ApiKey::ApiVersions as i16, (0, 0)),
        (ApiKey::Metadata as i16, (1, 8)),
        (ApiKey::FindCoordinator as i16, (0, 3)),
        (ApiKey::DescribeGroups as i16, (0, 5)),
        (ApiKey::ListOffsets as i16, (1, 7)),
        (ApiKey::OffsetFetch as i16, (1, 7)),
    ])
});

///  broker connection with a correlation id
#[derive(Debug)]
pub struct Connection {
    stream: TcpStream,
    correlation_id: i32,
}

impl Connection {
    async fn request_response<Q>(
        &mut self,
        req: Q,
        api_version: i16,
        client_id: Option<String>,
    ) -> Result<Q::Response, Error>
    where
        Q: Request + fmt::Debug,
        Q::Response: fmt::Debug,
    {
        let api_key = ApiKey::try_from(Q::KEY).map_err(|_| Error::UnknownApiKey(Q::KEY))?;
        let local = self.stream.local_addr().inspect(|local| debug!(%local))?;
        let peer = self.stream.peer_addr().inspect(|peer| debug!(%peer))?;

        let span = span!(Level::DEBUG, "client", local = %local, peer = %peer, ?api_key);

        async move {
            let correlation_id = self.correlation_id;

            self.request(&req, api_key, api_version, correlation_id, client_id)
                .await?;

            self.correlation_id = self.correlation_id.wrapping_add(1);

            self.response::<Q>(api_key, api_version, correlation_id)
                .await
        }
        .instrument(span)
        .await
    }

    /// send a request to the broker
    async fn request<Q>(
        &mut self,
        req: &Q,
        api_key: ApiKey,
        api_version: i16,
        correlation_id: i32,
        client_id: Option<String>,
    ) -> Result<(), Error>
    where
        Q: Request + fmt::Debug,
    {
        let payload = frame(req, api_key, api_version, correlation_id, client_id)?;
        debug!(?req, api_version, correlation_id, length = payload.len());

        self.stream
            .write_all(&payload[..])
            .await
            .map_err(Into::into)
    }

    /// demarshall a versioned response frame from the broker
    async fn response<Q>(
        &mut self,
        api_key: ApiKey,
        api_version: i16,
        correlation_id: i32,
    ) -> Result<Q::Response, Error>
    where
        Q: Request,
        Q::Response: fmt::Debug,
    {
        let mut encoded = self.read_frame().await?;

        let header =
            ResponseHeader::decode(&mut encoded, api_key.response_header_version(api_version))?;

        if header.correlation_id != correlation_id {
            return Err(Error::CorrelationId {
                expected: correlation_id,
                received: header.correlation_id,
            });
        }

        <Q::Response as Decodable>::decode(&mut encoded, api_version)
            .map_err(Into::into)
            .inspect(|response| debug!(?response))
    }

    /// read a size delimited frame from the broker, without the size
    async fn read_frame(&mut self) -> Result<Bytes, Error> {
        let mut size = [0u8; 4];
        _ = self.stream.read_exact(&mut size).await?;

        let mut buffer: Vec<u8> = vec![0u8; frame_length(size)?];
        _ = self.stream.read_exact(&mut buffer[..]).await?;

        Ok(Bytes::from(buffer))
    }
}

/// marshall a size delimited request frame
pub fn frame<Q>(
    req: &Q,
    api_key: ApiKey,
    api_version: i16,
    correlation_id: i32,
    client_id: Option<String>,
) -> Result<Bytes, Error>
where
    Q: Request,
{
    let header = RequestHeader::default()
        .with_request_api_key(Q::KEY)
        .with_request_api_version(api_version)
        .with_correlation_id(correlation_id)
        .with_client_id(client_id.map(StrBytes::from_string));

    let mut buffer = BytesMut::new();
    buffer.put_i32(0);

    header.encode(&mut buffer, api_key.request_header_version(api_version))?;
    req.encode(&mut buffer, api_version)?;

    let length = buffer.len() - size_of::<i32>();
    let length = i32::try_from(length).map_err(|_| Error::FrameLength(length as i64))?;
    buffer[..size_of::<i32>()].copy_from_slice(&length.to_be_bytes());

    Ok(buffer.freeze())
}

fn frame_length(encoded: [u8; 4]) -> Result<usize, Error> {
    let length = i32::from_be_bytes(encoded);

    usize::try_from(length)
        .ok()
        .filter(|length| *length <= MAX_FRAME_LENGTH)
        .ok_or(Error::FrameLength(length.into()))
}

/// manager of supported API versions for a broker
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Manager {
    broker: Url,
    client_id: Option<String>,
    versions: BTreeMap<i16, (i16, i16)>,
}

impl Manager {
    /// build a manager with a broker endpoint
    pub fn builder(broker: Url) -> Builder {
        Builder::broker(broker)
    }

    /// the broker endpoint
    pub fn broker(&self) -> &Url {
        &self.broker
    }

    /// client id used in requests to the broker
    pub fn client_id(&self) -> Option<String> {
        self.client_id.clone()
    }

    /// the highest version supported by both the broker and this client
    pub fn api_version(&self, api_key: i16) -> Result<i16, Error> {
        let (client_min, client_max) = SUPPORTED_API_VERSIONS
            .get(&api_key)
            .copied()
            .ok_or(Error::UnknownApiKey(api_key))?;

        let (broker_min, broker_max) = self
            .versions
            .get(&api_key)
            .copied()
            .ok_or(Error::UnknownApiKey(api_key))?;

        let version = client_max.min(broker_max);

        if version >= client_min.max(broker_min) {
            Ok(version)
        } else {
            Err(Error::UnsupportedVersion(api_key))
        }
    }

    /// resolve a host into an IP socket address
    async fn host_port(&self) -> Result<SocketAddr, Error> {
        if let Some(host) = self.broker.host_str()
            && let Some(port) = self.broker.port()
        {
            let mut addresses = lookup_host(format!("{host}:{port}"))
                .await?
                .filter(|socket_addr| matches!(socket_addr, SocketAddr::V4(_)));

            if let Some(socket_addr) = addresses.next().inspect(|socket_addr| debug!(?socket_addr))
            {
                return Ok(socket_addr);
            }
        }

        Err(Error::UnknownHost(self.broker.clone()))
    }
}

impl managed::Manager for Manager {
    type Type = Connection;
    type Error = Error;

    async fn create(&self) -> Result<Self::Type, Self::Error> {
        debug!(%self.broker);

        TcpStream::connect(self.host_port().await?)
            .await
            .inspect_err(|err| error!(broker = %self.broker, ?err))
            .map(|stream| Connection {
                stream,
                correlation_id: 0,
            })
            .map_err(Into::into)
    }

    async fn recycle(
        &self,
        obj: &mut Self::Type,
        metrics: &managed::Metrics,
    ) -> managed::RecycleResult<Self::Error> {
        debug!(?obj, ?metrics);
        Ok(())
    }
}

/// a managed pool holding the single connection to a broker
pub type Pool = managed::Pool<Manager>;

#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Builder {
    broker: Url,
    client_id: Option<String>,
}

impl Builder {
    /// broker url
    pub fn broker(broker: Url) -> Self {
        Self {
            broker,
            client_id: None,
        }
    }

    /// client id used when making requests to the broker
    pub fn client_id(self, client_id: Option<String>) -> Self {
        Self { client_id, ..self }
    }

    fn pool(&self, versions: BTreeMap<i16, (i16, i16)>) -> Result<Pool, Error> {
        Pool::builder(Manager {
            broker: self.broker.clone(),
            client_id: self.client_id.clone(),
            versions,
        })
        .max_size(1)
        .build()
        .map_err(Into::into)
    }

    /// inquire with the broker supported api versions
    async fn bootstrap(&self) -> Result<BTreeMap<i16, (i16, i16)>, Error> {
        let versions = BTreeMap::from([(ApiVersionsRequest::KEY, (0, 0))]);

        let response = self
            .pool(versions)
            .map(Client::new)?
            .call(ApiVersionsRequest::default())
            .await?;

        if response.error_code != 0 {
            return Err(Error::Message(format!(
                "api versions from {} failed with error code: {}",
                self.broker, response.error_code
            )));
        }

        Ok(response
            .api_keys
            .into_iter()
            .map(|api| (api.api_key, (api.min_version, api.max_version)))
            .collect())
    }

    /// establish the api versions supported by the broker
    pub async fn build(self) -> Result<Pool, Error> {
        self.bootstrap()
            .await
            .inspect(|versions| debug!(broker = %self.broker, ?versions))
            .and_then(|versions| self.pool(versions))
    }
}

/// API client using a connection pool
#[derive(Clone, Debug)]
pub struct Client {
    pool: Pool,
}

impl Client {
    /// create a new client using the supplied pool
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// the broker this client is connected to
    pub fn broker(&self) -> &Url {
        self.pool.manager().broker()
    }

    /// make an API request using the connection from the pool
    pub async fn call<Q>(&self, req: Q) -> Result<Q::Response, Error>
    where
        Q: Request + fmt::Debug,
        Q::Response: fmt::Debug,
    {
        let api_version = self.pool.manager().api_version(Q::KEY)?;
        let client_id = self.pool.manager().client_id();
        let mut connection = self.pool.get().await?;

        connection
            .request_response(req, api_version, client_id)
            .await
    }
}

#[cfg(test)]
mod tests {
    use kafka_protocol::messages::FindCoordinatorRequest;

    use super::*;

    #[test]
    fn frame_length_rejects_negative() {
        assert!(matches!(
            frame_length((-1i32).to_be_bytes()),
            Err(Error::FrameLength(-1))
        ));
        assert_eq!(6, frame_length(6i32.to_be_bytes()).unwrap());
    }

    #[test]
    fn frame_is_size_delimited() -> Result<(), Error> {
        let req = FindCoordinatorRequest::default()
            .with_key(StrBytes::from_static_str("abc"))
            .with_key_type(0);

        let encoded = frame(
            &req,
            ApiKey::FindCoordinator,
            0,
            12321,
            Some("grouplag".into()),
        )?;

        let length = i32::from_be_bytes(encoded[..4].try_into().unwrap());
        assert_eq!(encoded.len() - 4, length as usize);

        // api key, api version, correlation id
        assert_eq!(&[0, 10, 0, 0, 0, 0, 48, 33], &encoded[4..12]);

        Ok(())
    }

    #[test]
    fn api_version_is_capped() {
        let manager = Manager {
            broker: Url::parse("tcp://localhost:9092").unwrap(),
            client_id: None,
            versions: BTreeMap::from([
                (ApiKey::Metadata as i16, (0, 12)),
                (ApiKey::ListOffsets as i16, (0, 0)),
            ]),
        };

        assert_eq!(8, manager.api_version(ApiKey::Metadata as i16).unwrap());

        assert!(matches!(
            manager.api_version(ApiKey::ListOffsets as i16),
            Err(Error::UnsupportedVersion(_))
        ));

        assert!(matches!(
            manager.api_version(ApiKey::DescribeGroups as i16),
            Err(Error::UnknownApiKey(_))
        ));
    }
}
