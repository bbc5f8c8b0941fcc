use crate::net::connection::{ConnectionId, ConnectionRegistry};
use crate::net::protocol::ServerMessage;

/// What happened to a forwarded signal. Never reported back to the sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    Delivered,
    TargetGone,
}

/// Forward an opaque voice signal to exactly one connection.
///
/// The payload is moved through untouched. No pairing state is kept; a
/// target that is not (or no longer) connected just means the signal is
/// dropped.
pub fn relay(
    connections: &ConnectionRegistry,
    from: ConnectionId,
    target: ConnectionId,
    signal: Vec<u8>,
) -> RelayOutcome {
    let Some(handle) = connections.get(target) else {
        return RelayOutcome::TargetGone;
    };

    if handle.send(ServerMessage::VoiceSignal { from, signal }) {
        RelayOutcome::Delivered
    } else {
        RelayOutcome::TargetGone
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::connection::{ConnectionHandle, Outgoing};

    #[test]
    fn test_relay_delivers_payload_verbatim() {
        let mut registry = ConnectionRegistry::new();
        let (a, _ra) = ConnectionHandle::channel();
        let (b, mut rb) = ConnectionHandle::channel();
        let from = registry.insert(a);
        let target = registry.insert(b);

        let payload = vec![0, 159, 146, 150, b'<', b'>'];
        assert_eq!(
            relay(&registry, from, target, payload.clone()),
            RelayOutcome::Delivered
        );
        assert_eq!(
            rb.reliable.try_recv().unwrap(),
            Outgoing::Message(ServerMessage::VoiceSignal {
                from,
                signal: payload
            })
        );
    }

    #[test]
    fn test_relay_only_reaches_target() {
        let mut registry = ConnectionRegistry::new();
        let (a, mut ra) = ConnectionHandle::channel();
        let (b, _rb) = ConnectionHandle::channel();
        let (c, mut rc) = ConnectionHandle::channel();
        let from = registry.insert(a);
        let target = registry.insert(b);
        registry.insert(c);

        relay(&registry, from, target, vec![1]);
        assert!(ra.reliable.try_recv().is_err());
        assert!(rc.reliable.try_recv().is_err());
    }

    #[test]
    fn test_relay_missing_target_is_silent() {
        let mut registry = ConnectionRegistry::new();
        let (a, mut ra) = ConnectionHandle::channel();
        let from = registry.insert(a);

        assert_eq!(
            relay(&registry, from, ConnectionId(404), vec![1, 2]),
            RelayOutcome::TargetGone
        );
        assert!(ra.reliable.try_recv().is_err());
    }

    #[test]
    fn test_relay_target_writer_gone() {
        let mut registry = ConnectionRegistry::new();
        let (b, rb) = ConnectionHandle::channel();
        let target = registry.insert(b);
        drop(rb);

        assert_eq!(
            relay(&registry, ConnectionId(1), target, vec![]),
            RelayOutcome::TargetGone
        );
    }
}
