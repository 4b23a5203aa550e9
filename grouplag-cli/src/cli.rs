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

use std::{process, str::FromStr};

use clap::Parser;
use grouplag_lag::{Lag, Outcome};
use tracing::debug;
use url::Url;

use crate::{EnvVarExp, Error, Result};

const SCHEME: &str = "tcp";

/// Report the lag of each partition assigned within a consumer group
#[derive(Clone, Debug, Parser)]
#[command(name = "grouplag", version, about, long_about = None)]
pub struct Cli {
    /// Broker to bootstrap from, as host:port
    #[arg(short, long, env = "BOOTSTRAP_SERVER")]
    bootstrap_server: EnvVarExp<Bootstrap>,

    /// The consumer group to report on
    #[arg(short, long, env = "GROUP")]
    group: EnvVarExp<String>,

    /// Report as JSON rather than a table
    #[arg(short = 'J', long)]
    json: bool,

    /// Include the log start offset of each partition in the table
    #[arg(short = 's', long)]
    include_start_offset: bool,
}

impl From<Cli> for Lag {
    fn from(value: Cli) -> Self {
        Lag::builder()
            .broker(value.bootstrap_server.into_inner().into_inner())
            .group(value.group.into_inner())
            .json(value.json)
            .include_start_offset(value.include_start_offset)
            .build()
    }
}

impl Cli {
    pub async fn main() -> Result<Outcome> {
        debug!(pid = process::id());

        let cli = Cli::try_parse().or_else(|err| {
            if err.use_stderr() {
                Err(Error::Usage(err))
            } else {
                err.exit()
            }
        })?;

        Lag::from(cli)
            .main()
            .await
            .inspect(|outcome| debug!(?outcome))
            .map_err(Into::into)
    }
}

/// a bootstrap broker given as `host:port` or `tcp://host:port`
///
/// Only the first of a comma separated list is used.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Bootstrap(Url);

impl Bootstrap {
    pub fn into_inner(self) -> Url {
        self.0
    }
}

impl FromStr for Bootstrap {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let first = s
            .split(',')
            .map(str::trim)
            .find(|broker| !broker.is_empty())
            .ok_or_else(|| Error::Bootstrap(s.into()))?;

        let url = if first.contains("://") {
            Url::parse(first)?
        } else {
            Url::parse(&format!("{SCHEME}://{first}"))?
        };

        if url.scheme() == SCHEME && url.host_str().is_some() && url.port().is_some() {
            Ok(Self(url))
        } else {
            Err(Error::Bootstrap(s.into()))
        }
    }
}
