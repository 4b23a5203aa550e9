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

use std::io::Write;

use crate::{PartitionState, Report, Result};

const NO_OWNER: &str = "-";

#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Format {
    #[default]
    Table,
    Json,
}

/// render a report, or why there is no report, for a group
#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Presenter {
    group: String,
    format: Format,
    include_start_offset: bool,
}

impl Presenter {
    pub fn new(group: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            ..Default::default()
        }
    }

    pub fn format(self, format: Format) -> Self {
        Self { format, ..self }
    }

    pub fn include_start_offset(self, include_start_offset: bool) -> Self {
        Self {
            include_start_offset,
            ..self
        }
    }

    pub fn report<W: Write>(&self, report: &Report, out: &mut W) -> Result<()> {
        match self.format {
            Format::Table => self.table(report, out),
            Format::Json => Self::json(report, out),
        }
    }

    pub fn group_dead<W: Write>(&self, out: &mut W) -> Result<()> {
        writeln!(out, "Consumer group {} does not exist.", self.group).map_err(Into::into)
    }

    pub fn group_rebalancing<W: Write>(&self, out: &mut W) -> Result<()> {
        writeln!(out, "Consumer group {} is rebalancing.", self.group).map_err(Into::into)
    }

    fn json<W: Write>(report: &Report, out: &mut W) -> Result<()> {
        serde_json::to_writer_pretty(&mut *out, report)?;
        writeln!(out).map_err(Into::into)
    }

    fn table<W: Write>(&self, report: &Report, out: &mut W) -> Result<()> {
        Self::columns(
            out,
            [
                "GROUP",
                "TOPIC",
                "PARTITION",
                "CURRENT-OFFSET",
                "LOG-END-OFFSET",
                "LAG",
            ],
        )?;

        if self.include_start_offset {
            writeln!(out, "{:<30} LOG-START-OFFSET", "OWNER")?;
        } else {
            writeln!(out, "{:<30}", "OWNER")?;
        }

        for (topic, state) in report.iter() {
            Self::columns(
                out,
                [
                    &self.group,
                    topic,
                    &state.partition.to_string(),
                    &state.current_offset.to_string(),
                    &state.log_end_offset.to_string(),
                    &state.lag.to_string(),
                ],
            )?;

            let owner = owner(state);

            if self.include_start_offset {
                writeln!(out, "{owner:<30} {}", state.log_start_offset)?;
            } else {
                writeln!(out, "{owner}")?;
            }
        }

        Ok(())
    }

    fn columns<W: Write>(
        out: &mut W,
        [group, topic, partition, current_offset, log_end_offset, lag]: [&str; 6],
    ) -> Result<()> {
        write!(
            out,
            "{group:<30} {topic:<30} {partition:<10} {current_offset:<15} {log_end_offset:<15} {lag:<15} "
        )
        .map_err(Into::into)
    }
}

fn owner(state: &PartitionState) -> String {
    state.owner().map_or_else(
        || String::from(NO_OWNER),
        |owner| format!("{}_{}", owner.client_id, owner.host),
    )
}
