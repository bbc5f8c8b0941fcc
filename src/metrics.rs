//! Prometheus-compatible metrics
//!
//! Served by the HTTP API at `/metrics` (Prometheus text) and
//! `/metrics/json`.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

const EVENT_HISTORY: usize = 1000;

/// Metrics registry for the session server
#[derive(Debug)]
pub struct Metrics {
    // Realtime channel
    pub connections_active: AtomicU64,
    pub connections_rejected: AtomicU64,
    pub players_online: AtomicU64,

    // Registry
    pub sessions: AtomicU64,
    pub invites: AtomicU64,
    pub logins_failed: AtomicU64,

    // Traffic
    pub messages_received: AtomicU64,
    pub messages_sent: AtomicU64,
    pub messages_throttled: AtomicU64,
    pub volatile_dropped: AtomicU64,
    pub chat_messages: AtomicU64,
    pub voice_relayed: AtomicU64,
    pub voice_dropped: AtomicU64,

    // World event handling time (microseconds)
    pub event_time_us: AtomicU64,
    pub events_handled: AtomicU64,

    start_time: Instant,

    // Rolling event times; percentiles are computed when rendered
    event_history: Mutex<VecDeque<u64>>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            connections_active: AtomicU64::new(0),
            connections_rejected: AtomicU64::new(0),
            players_online: AtomicU64::new(0),
            sessions: AtomicU64::new(0),
            invites: AtomicU64::new(0),
            logins_failed: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            messages_sent: AtomicU64::new(0),
            messages_throttled: AtomicU64::new(0),
            volatile_dropped: AtomicU64::new(0),
            chat_messages: AtomicU64::new(0),
            voice_relayed: AtomicU64::new(0),
            voice_dropped: AtomicU64::new(0),
            event_time_us: AtomicU64::new(0),
            events_handled: AtomicU64::new(0),
            start_time: Instant::now(),
            event_history: Mutex::new(VecDeque::with_capacity(EVENT_HISTORY)),
        }
    }

    /// Record how long the world took to handle one event.
    ///
    /// Runs once per world event, so it only stores and appends.
    pub fn record_event_time(&self, duration: Duration) {
        let us = duration.as_micros() as u64;
        self.event_time_us.store(us, Ordering::Relaxed);
        self.events_handled.fetch_add(1, Ordering::Relaxed);

        let mut history = self.event_history.lock();
        if history.len() == EVENT_HISTORY {
            history.pop_front();
        }
        history.push_back(us);
    }

    /// 99th percentile over the recent event history; 0 until 10 samples
    pub fn event_time_p99_us(&self) -> u64 {
        let mut sorted: Vec<u64> = {
            let history = self.event_history.lock();
            if history.len() < 10 {
                return 0;
            }
            history.iter().copied().collect()
        };
        sorted.sort_unstable();
        let p99_idx = (sorted.len() as f32 * 0.99) as usize;
        sorted[p99_idx.min(sorted.len() - 1)]
    }

    #[inline]
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn set(gauge: &AtomicU64, value: usize) {
        gauge.store(value as u64, Ordering::Relaxed);
    }

    /// Get uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Generate Prometheus-format metrics output
    pub fn to_prometheus(&self) -> String {
        let mut output = String::with_capacity(2048);

        macro_rules! metric {
            ($name:expr, $help:expr, $type:expr, $value:expr) => {
                output.push_str(&format!(
                    "# HELP {} {}\n# TYPE {} {}\n{} {}\n",
                    $name, $help, $name, $type, $name, $value
                ));
            };
        }

        metric!("terra_connections_active", "Open realtime connections", "gauge",
            self.connections_active.load(Ordering::Relaxed));
        metric!("terra_connections_rejected_total", "Connections refused by the gate or limits", "counter",
            self.connections_rejected.load(Ordering::Relaxed));
        metric!("terra_players_online", "Entries in the player table", "gauge",
            self.players_online.load(Ordering::Relaxed));

        metric!("terra_sessions", "Stored sessions", "gauge",
            self.sessions.load(Ordering::Relaxed));
        metric!("terra_invites", "Valid invite codes", "gauge",
            self.invites.load(Ordering::Relaxed));
        metric!("terra_logins_failed_total", "Rejected admin logins", "counter",
            self.logins_failed.load(Ordering::Relaxed));

        metric!("terra_messages_received_total", "Client messages received", "counter",
            self.messages_received.load(Ordering::Relaxed));
        metric!("terra_messages_sent_total", "Server messages queued", "counter",
            self.messages_sent.load(Ordering::Relaxed));
        metric!("terra_messages_throttled_total", "Client messages dropped by rate limiting", "counter",
            self.messages_throttled.load(Ordering::Relaxed));
        metric!("terra_volatile_dropped_total", "Movement updates dropped under backpressure", "counter",
            self.volatile_dropped.load(Ordering::Relaxed));
        metric!("terra_chat_messages_total", "Chat messages broadcast", "counter",
            self.chat_messages.load(Ordering::Relaxed));
        metric!("terra_voice_signals_relayed_total", "Voice signals forwarded", "counter",
            self.voice_relayed.load(Ordering::Relaxed));
        metric!("terra_voice_signals_dropped_total", "Voice signals with no live target", "counter",
            self.voice_dropped.load(Ordering::Relaxed));

        metric!("terra_event_time_microseconds", "Last world event handling time", "gauge",
            self.event_time_us.load(Ordering::Relaxed));
        metric!("terra_event_time_p99_microseconds", "99th percentile world event handling time", "gauge",
            self.event_time_p99_us());
        metric!("terra_events_handled_total", "World events handled", "counter",
            self.events_handled.load(Ordering::Relaxed));
        metric!("terra_uptime_seconds", "Server uptime in seconds", "counter",
            self.uptime_seconds());

        output
    }

    /// JSON snapshot of the same counters
    pub fn to_json(&self) -> serde_json::Value {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        serde_json::json!({
            "connections": {
                "active": load(&self.connections_active),
                "rejected": load(&self.connections_rejected),
            },
            "players": load(&self.players_online),
            "registry": {
                "sessions": load(&self.sessions),
                "invites": load(&self.invites),
                "logins_failed": load(&self.logins_failed),
            },
            "traffic": {
                "received": load(&self.messages_received),
                "sent": load(&self.messages_sent),
                "throttled": load(&self.messages_throttled),
                "volatile_dropped": load(&self.volatile_dropped),
                "chat": load(&self.chat_messages),
                "voice_relayed": load(&self.voice_relayed),
                "voice_dropped": load(&self.voice_dropped),
            },
            "events": {
                "handled": load(&self.events_handled),
                "time_us": load(&self.event_time_us),
                "time_p99_us": self.event_time_p99_us(),
            },
            "uptime_seconds": self.uptime_seconds(),
        })
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
