//! Routing of inbound client frames.
//!
//! Lobby clients speak the same envelope format in both directions. Inbound
//! frames are stamped with the sender and room before being relayed, so a
//! client cannot impersonate another connection or post into a foreign room.

use crate::{
    connection::ConnectionManager,
    error::ServerError,
    messaging::{Envelope, ErrorContent, Payload},
};
use tracing::{debug, trace};

/// Error code sent back for frames that are not valid envelopes.
pub const INVALID_MESSAGE_CODE: i32 = 400;

/// Routes one text frame received from `connection_id`.
///
/// * `heartbeat` is answered to the sender only
/// * any other envelope is relayed to `room_id`, excluding the sender
/// * frames that do not decode get an `error` envelope back
///
/// Delivery failures to individual room members are reported by the manager
/// and do not fail the route.
pub async fn route_client_message(
    text: &str,
    connection_id: &str,
    room_id: &str,
    connection_manager: &ConnectionManager,
) -> Result<(), ServerError> {
    let envelope = match Envelope::decode(text) {
        Ok(envelope) => envelope,
        Err(e) => {
            debug!(conn_id = %connection_id, error = %e, "rejected malformed client frame");
            let reply = Envelope::new(
                room_id,
                Payload::Error(ErrorContent {
                    code: INVALID_MESSAGE_CODE,
                    message: format!("Invalid message: {e}"),
                    ..Default::default()
                }),
            );
            connection_manager
                .send_to_connection(connection_id, &reply)
                .await?;
            return Ok(());
        }
    };

    if matches!(envelope.payload, Payload::Heartbeat(_)) {
        trace!(conn_id = %connection_id, "💓 heartbeat");
        let reply = Envelope::new(room_id, Payload::Heartbeat(None));
        connection_manager
            .send_to_connection(connection_id, &reply)
            .await?;
        return Ok(());
    }

    let relayed = Envelope {
        from: Some(connection_id.to_string()),
        room_id: room_id.to_string(),
        ..envelope
    };

    let report = connection_manager
        .send_to_group(room_id, &relayed, &[connection_id])
        .await?;

    trace!(
        conn_id = %connection_id,
        room_id = %room_id,
        kind = relayed.kind(),
        delivered = report.delivered_count(),
        "relayed client message"
    );
    Ok(())
}
