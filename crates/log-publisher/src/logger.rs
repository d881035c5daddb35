// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Log line formatting for the publisher.
//!
//! ```text
//! LOG_PUBLISHER | LEVEL | [span_name{span_fields}:] message {event_fields}
//! ```
//!
//! For example:
//!
//! ```text
//! LOG_PUBLISHER | INFO | PUBLISHER | Events sent: 42
//! LOG_PUBLISHER | ERROR | LB | Dropping events after exhausting attempts events=3 reason=Temporary bulk send failure
//! ```

use crate::errors::ConfigError;
use std::fmt;
use tracing_core::{Event, Subscriber};
use tracing_subscriber::fmt::{
    format::{self, FormatEvent, FormatFields},
    FmtContext, FormattedFields,
};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

pub const LOG_PREFIX: &str = "LOG_PUBLISHER";

#[derive(Debug, Clone, Copy)]
pub struct Formatter;

impl<S, N> FormatEvent<S, N> for Formatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let metadata = event.metadata();
        write!(&mut writer, "{LOG_PREFIX} | {} | ", metadata.level())?;

        if let Some(scope) = ctx.event_scope() {
            for span in scope.from_root() {
                write!(writer, "{}", span.name())?;

                // Span fields are recorded by the fmt layer on span creation;
                // a span without them is printed by name only.
                let ext = span.extensions();
                if let Some(fields) = ext.get::<FormattedFields<N>>() {
                    if !fields.is_empty() {
                        write!(writer, "{{{fields}}}")?;
                    }
                }
                write!(writer, ": ")?;
            }
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Builds the filter for `level`, scoped to this crate.
pub fn env_filter(level: &str) -> Result<EnvFilter, ConfigError> {
    EnvFilter::try_new(format!("log_publisher={level}"))
        .map_err(|e| ConfigError::Logging(e.to_string()))
}

/// Installs a global subscriber writing formatted lines to stdout.
///
/// Fails if the level is invalid or a global subscriber is already set.
pub fn init(level: &str) -> Result<(), ConfigError> {
    let subscriber = tracing_subscriber::fmt()
        .with_ansi(false)
        .event_format(Formatter)
        .with_env_filter(env_filter(level)?)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| ConfigError::Logging(e.to_string()))
}
