//! Server command handlers
//!
//! Each handler returns `Result<()>`. [`PublisherShared::handle_command`] turns an `Err` into
//! a `Failed` response echoing the command code, carrying the error text, and reports the
//! same text through the error callback. The connection keeps reading either way.

use gep_core::{
    compression, data_packet_flags, decode_client_string, CommandFrame, OperationalModes,
    ServerCommand, ServerResponse, Settings, SignalIndexCache,
};
use gep_metadata::schema;
use std::sync::atomic::Ordering;
use std::time::Instant;
use tracing::{debug, warn};

use crate::catalog::{build_signal_index_cache, filter_metadata, serialize_metadata};
use crate::connection::ClientConnection;
use crate::error::{PublisherError, Result};
use crate::measurement::MAX_COMPACT_SIGNALS;
use crate::publisher::PublisherShared;

/// Subscribe body: flags byte plus the connection string length
const SUBSCRIBE_HEADER_SIZE: usize = 5;

fn read_u32_be(data: &[u8]) -> Option<u32> {
    data.get(..4)
        .and_then(|bytes| bytes.try_into().ok())
        .map(u32::from_be_bytes)
}

/// Compact data packets address signals with a 16-bit index
fn check_compact_capacity(compact: bool, signals: usize) -> Result<()> {
    if compact && signals > MAX_COMPACT_SIGNALS {
        return Err(PublisherError::CompactSubscriptionTooLarge {
            selected: signals,
            limit: MAX_COMPACT_SIGNALS,
        });
    }
    Ok(())
}

/// `"<source> version <version> built on <buildDate>"` from an `assemblyInfo` blob
fn describe_assembly(info: &str) -> String {
    let settings = Settings::parse(info);
    let value = |key: &str, fallback: &'static str| {
        settings
            .get(key)
            .filter(|v| !v.is_empty())
            .unwrap_or(fallback)
            .to_string()
    };

    format!(
        "{} version {} built on {}",
        value("source", "unknown source"),
        value("version", "?.?.?.?"),
        value("buildDate", "undefined date")
    )
}

impl PublisherShared {
    /// Route one command to its handler
    pub(crate) async fn handle_command(&self, connection: &ClientConnection, frame: CommandFrame) {
        let command = frame.command;
        let body = &frame.body[..];

        debug!(
            "Command 0x{:02X} ({} bytes) from {}",
            command,
            body.len(),
            connection.connection_id()
        );

        let result = match ServerCommand::from_u8(command) {
            Some(ServerCommand::Subscribe) => self.handle_subscribe(connection, body).await,
            Some(ServerCommand::Unsubscribe) => {
                self.handle_unsubscribe(connection);
                Ok(())
            }
            Some(ServerCommand::MetadataRefresh) => {
                self.handle_metadata_refresh(connection, body).await
            }
            Some(ServerCommand::DefineOperationalModes) => {
                self.handle_define_operational_modes(connection, body)
            }
            Some(ServerCommand::RotateCipherKeys)
            | Some(ServerCommand::UpdateProcessingInterval)
            | Some(ServerCommand::ConfirmNotification)
            | Some(ServerCommand::ConfirmBufferBlock)
            | Some(ServerCommand::PublishCommandMeasurements)
            | Some(ServerCommand::UserCommand(_)) => {
                debug!(
                    "Command 0x{:02X} from {} has no handler",
                    command,
                    connection.connection_id()
                );
                Ok(())
            }
            Some(ServerCommand::Connect) | None => Err(PublisherError::UnrecognizedCommand {
                connection: connection.connection_id(),
                command,
            }),
        };

        if let Err(e) = result {
            let message = e.to_string();
            connection
                .send_message(ServerResponse::Failed, command, &message)
                .await;
            self.dispatcher().error(message);
        }
    }

    async fn handle_subscribe(&self, connection: &ClientConnection, body: &[u8]) -> Result<()> {
        if body.len() < SUBSCRIBE_HEADER_SIZE {
            return Err(PublisherError::SubscriptionBufferTooSmall);
        }

        let flags = body[0];
        if flags & data_packet_flags::SYNCHRONIZED != 0 {
            return Err(PublisherError::SynchronizedSubscription);
        }

        let length = read_u32_be(&body[1..])
            .ok_or(PublisherError::SubscriptionBufferTooSmall)? as usize;

        if length == 0 {
            return Err(PublisherError::MissingConnectionString);
        }
        if body.len() - SUBSCRIBE_HEADER_SIZE < length {
            return Err(PublisherError::SubscriptionBufferTooSmall);
        }

        let connection_string = decode_client_string(
            connection.encoding(),
            &body[SUBSCRIBE_HEADER_SIZE..SUBSCRIBE_HEADER_SIZE + length],
        )
        .map_err(|e| PublisherError::Subscription(e.to_string()))?;

        let settings = Settings::parse(&connection_string);
        let modes = connection.operational_modes();
        let compact = flags & data_packet_flags::COMPACT != 0;

        let include_time = settings.get_bool("includeTime").unwrap_or(true);
        let use_millisecond_resolution = settings
            .get_bool("useMillisecondResolution")
            .unwrap_or(false);
        let nan_requested = settings.get_bool("requestNaNValueFilter").unwrap_or(false);
        let is_nan_filtered = (nan_requested
            && self.allow_nan_value_filter.load(Ordering::SeqCst))
            || self.force_nan_value_filter.load(Ordering::SeqCst);

        let cache = match settings.get("inputMeasurementKeys") {
            Some(expression) => {
                let catalog = self.catalog();
                build_signal_index_cache(
                    self.filter.as_ref(),
                    &catalog.active,
                    connection.subscriber_id(),
                    expression,
                )?
            }
            None => SignalIndexCache::new(connection.subscriber_id()),
        };

        if settings.contains("dataChannel") {
            debug!(
                "Ignoring UDP data channel request from {}",
                connection.connection_id()
            );
        }

        check_compact_capacity(compact, cache.count())?;

        // Everything fallible happens before the connection is touched
        let mut image = cache.encode(connection.encoding());
        if modes.compress_signal_index_cache() && modes.uses_gzip() {
            image = compression::gzip(&image)?;
        }

        let subscription_info = settings.get("assemblyInfo").map(describe_assembly);

        connection.update_settings(|state| {
            state.use_compact_measurement_format = compact;
            state.use_payload_compression = modes.compress_payload_data();
            state.include_time = include_time;
            state.use_millisecond_resolution = use_millisecond_resolution;
            state.is_nan_filtered = is_nan_filtered;
            if let Some(info) = &subscription_info {
                state.subscription_info = info.clone();
            }
        });

        if let Some(info) = subscription_info {
            self.dispatcher()
                .status(format!("Reported client subscription info: {}", info));
        }

        let signal_count = cache.count();

        connection
            .send_response(
                ServerResponse::UpdateSignalIndexCache,
                ServerCommand::Subscribe.as_u8(),
                image,
            )
            .await;

        connection.set_signal_index_cache(cache);
        connection.set_subscribed(true);

        let message = format!(
            "Client subscribed as {}compact unsynchronized with {} signals.",
            if compact { "" } else { "non-" },
            signal_count
        );

        connection
            .send_message(
                ServerResponse::Succeeded,
                ServerCommand::Subscribe.as_u8(),
                &message,
            )
            .await;
        self.dispatcher().status(message);

        Ok(())
    }

    fn handle_unsubscribe(&self, connection: &ClientConnection) {
        connection.set_subscribed(false);
        debug!("Client {} unsubscribed", connection.connection_id());
    }

    async fn handle_metadata_refresh(
        &self,
        connection: &ClientConnection,
        body: &[u8],
    ) -> Result<()> {
        if !self.allow_metadata_refresh.load(Ordering::SeqCst) {
            return Err(PublisherError::MetadataRefreshDisallowed);
        }

        let connection_id = connection.connection_id();
        self.dispatcher().status(format!(
            "Received meta-data refresh request from {}, preparing response...",
            connection_id
        ));

        let started = Instant::now();
        let catalog = self.catalog();
        let mut selections = None;

        if let Some(length) = read_u32_be(body).map(|l| l as usize) {
            match body.get(4..4 + length) {
                Some(filters) if length > 0 => {
                    let evaluated = decode_client_string(connection.encoding(), filters)
                        .map_err(|e| e.to_string())
                        .and_then(|expression| {
                            self.filter
                                .select_tables(
                                    &catalog.all,
                                    schema::MEASUREMENT_DETAIL,
                                    &expression,
                                )
                                .map_err(|e| e.to_string())
                        });

                    match evaluated {
                        Ok(selected) => selections = Some(selected),
                        Err(e) => self.dispatcher().error(format!(
                            "Failed to parse subscriber provided meta-data filter expressions: {}",
                            e
                        )),
                    }
                }
                Some(_) => {}
                None => debug!(
                    "Meta-data filter from {} declares {} bytes but carries {}",
                    connection_id,
                    length,
                    body.len() - 4
                ),
            }
        }

        let metadata = filter_metadata(&catalog.all, selections.as_deref());
        let serialized = serialize_metadata(connection.operational_modes(), &metadata)
            .map_err(|e| PublisherError::MetadataTransfer(e.to_string()))?;

        let rows = metadata.total_rows();
        if rows > 0 {
            self.dispatcher().status(format!(
                "{} records spanning {} tables of meta-data prepared in {:.2?}, sending response to {}...",
                rows,
                metadata.table_count(),
                started.elapsed(),
                connection_id
            ));
        } else {
            let filtered = selections.as_ref().is_some_and(|s| !s.is_empty());
            self.dispatcher().status(format!(
                "No meta-data is available{}, sending an empty response to {}...",
                if filtered {
                    " due to user applied meta-data filters"
                } else {
                    ""
                },
                connection_id
            ));
        }

        connection
            .send_response(
                ServerResponse::Succeeded,
                ServerCommand::MetadataRefresh.as_u8(),
                serialized,
            )
            .await;

        Ok(())
    }

    fn handle_define_operational_modes(
        &self,
        connection: &ClientConnection,
        body: &[u8],
    ) -> Result<()> {
        let modes = read_u32_be(body)
            .map(OperationalModes)
            .ok_or(PublisherError::OperationalModesBufferTooSmall)?;

        if modes.version() != 0 {
            let message = format!(
                "Protocol version not supported. Operational modes may not be set correctly for client \"{}\".",
                connection.connection_id()
            );
            warn!("{}", message);
            self.dispatcher().status(message);
        }

        connection.set_operational_modes(modes)?;

        debug!(
            "Client {} operational modes 0x{:08X}, encoding {}",
            connection.connection_id(),
            modes.bits(),
            connection.encoding().name()
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_u32_be() {
        assert_eq!(read_u32_be(&[0, 0, 1, 2, 9]), Some(258));
        assert_eq!(read_u32_be(&[0, 0, 1]), None);
    }

    #[test]
    fn test_compact_capacity() {
        assert!(check_compact_capacity(true, MAX_COMPACT_SIGNALS).is_ok());
        assert!(check_compact_capacity(false, MAX_COMPACT_SIGNALS + 1).is_ok());

        let err = check_compact_capacity(true, MAX_COMPACT_SIGNALS + 1).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Compact measurement format supports at most 65536 signals but the subscription selected 65537."
        );
    }

    #[test]
    fn test_describe_assembly() {
        assert_eq!(
            describe_assembly("source=TestClient; version=1.2.3.4; buildDate=2024-01-01"),
            "TestClient version 1.2.3.4 built on 2024-01-01"
        );
        assert_eq!(
            describe_assembly(""),
            "unknown source version ?.?.?.? built on undefined date"
        );
    }
}
