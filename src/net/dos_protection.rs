//! Admission caps and per-connection message budgets for the realtime
//! channel.
//!
//! Movement, chat and voice signaling draw from separate budgets. Excess
//! movement and voice signaling are shed quietly: the next position update
//! supersedes a dropped one, and voice negotiation is best-effort. Excess
//! chat counts as a violation; enough violations without a clean window in
//! between end the connection.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use crate::net::framing::MAX_FRAME_SIZE;
use crate::net::protocol::ClientMessage;

#[derive(Debug, Clone)]
pub struct DoSConfig {
    pub max_connections_total: usize,
    pub max_connections_per_ip: usize,
    /// Movement budget per window
    pub max_moves_per_window: u32,
    /// Chat budget per window
    pub max_chat_per_window: u32,
    /// Voice signaling budget per window; sized for an offer plus trickled
    /// candidates to every peer at once
    pub max_voice_signals_per_window: u32,
    /// Largest inbound frame or datagram accepted
    pub max_message_size: usize,
    pub rate_limit_window: Duration,
    pub violations_before_disconnect: u32,
}

impl Default for DoSConfig {
    fn default() -> Self {
        Self {
            max_connections_total: 256,
            max_connections_per_ip: 8,
            max_moves_per_window: 60,
            max_chat_per_window: 30,
            max_voice_signals_per_window: 240,
            max_message_size: MAX_FRAME_SIZE,
            rate_limit_window: Duration::from_secs(1),
            violations_before_disconnect: 5,
        }
    }
}

/// Which budget a client message draws from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageClass {
    Movement,
    Chat,
    Voice,
}

impl MessageClass {
    pub fn of(message: &ClientMessage) -> Self {
        match message {
            ClientMessage::Move { .. } => MessageClass::Movement,
            ClientMessage::Chat(_) => MessageClass::Chat,
            ClientMessage::VoiceSignal { .. } => MessageClass::Voice,
        }
    }
}

/// Handle for a registered connection slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GuardId(u64);

/// Fixed-window message budget
#[derive(Debug)]
struct Budget {
    used: u32,
    window_start: Instant,
}

impl Budget {
    fn fresh() -> Self {
        Self {
            used: 0,
            window_start: Instant::now(),
        }
    }

    /// Spend one unit against `limit`
    fn spend(&mut self, limit: u32, window: Duration) -> Spend {
        let elapsed = self.window_start.elapsed();
        let mut clean_rollover = false;
        if elapsed >= window {
            // Idle for a whole window counts as clean too
            clean_rollover = self.used <= limit || elapsed >= window * 2;
            self.window_start = Instant::now();
            self.used = 0;
        }
        self.used = self.used.saturating_add(1);
        Spend {
            fits: self.used <= limit,
            clean_rollover,
        }
    }
}

/// Outcome of one [`Budget::spend`]
#[derive(Debug, Clone, Copy)]
struct Spend {
    fits: bool,
    /// A new window started and the one before it stayed within budget
    clean_rollover: bool,
}

#[derive(Debug)]
struct Slot {
    ip: IpAddr,
    moves: Budget,
    chat: Budget,
    voice: Budget,
    violations: u32,
}

/// Live connection counts keyed by address
#[derive(Debug, Default)]
struct IpSlots {
    counts: HashMap<IpAddr, usize>,
}

impl IpSlots {
    fn get(&self, ip: IpAddr) -> usize {
        self.counts.get(&ip).copied().unwrap_or(0)
    }

    fn take(&mut self, ip: IpAddr) {
        *self.counts.entry(ip).or_default() += 1;
    }

    fn give_back(&mut self, ip: IpAddr) {
        if let Some(count) = self.counts.get_mut(&ip) {
            *count -= 1;
            if *count == 0 {
                self.counts.remove(&ip);
            }
        }
    }
}

pub struct DoSProtection {
    config: DoSConfig,
    slots: HashMap<GuardId, Slot>,
    per_ip: IpSlots,
}

impl DoSProtection {
    pub fn new(config: DoSConfig) -> Self {
        Self {
            config,
            slots: HashMap::new(),
            per_ip: IpSlots::default(),
        }
    }

    pub fn config(&self) -> &DoSConfig {
        &self.config
    }

    /// Would a connection from `ip` fit under both caps right now
    pub fn check_connection(&self, ip: IpAddr) -> Result<(), DoSError> {
        if self.slots.len() >= self.config.max_connections_total {
            Err(DoSError::TooManyConnections)
        } else if self.per_ip.get(ip) >= self.config.max_connections_per_ip {
            Err(DoSError::TooManyConnectionsFromIp)
        } else {
            Ok(())
        }
    }

    /// Claim a slot for `ip`
    pub fn register_connection(&mut self, ip: IpAddr) -> Result<GuardId, DoSError> {
        self.check_connection(ip)?;

        let id = loop {
            let candidate = GuardId(rand::random());
            if !self.slots.contains_key(&candidate) {
                break candidate;
            }
        };

        self.per_ip.take(ip);
        self.slots.insert(
            id,
            Slot {
                ip,
                moves: Budget::fresh(),
                chat: Budget::fresh(),
                voice: Budget::fresh(),
                violations: 0,
            },
        );
        Ok(id)
    }

    /// Free a slot. Releasing twice is a no-op.
    pub fn unregister_connection(&mut self, id: GuardId) {
        if let Some(slot) = self.slots.remove(&id) {
            self.per_ip.give_back(slot.ip);
        }
    }

    pub fn check_size(&self, size: usize) -> Result<(), DoSError> {
        if size > self.config.max_message_size {
            return Err(DoSError::MessageTooLarge(size));
        }
        Ok(())
    }

    /// Charge a decoded message to its connection's budget.
    ///
    /// `Throttled` and `RateLimitExceeded` drop the message only;
    /// `ViolationLimitExceeded` closes the connection. A chat window that
    /// stays within budget clears earlier violations.
    #[cfg(feature = "dos_ratelimit")]
    pub fn check_message(&mut self, id: GuardId, class: MessageClass) -> Result<(), DoSError> {
        let config = &self.config;
        let Some(slot) = self.slots.get_mut(&id) else {
            return Ok(());
        };
        let window = config.rate_limit_window;

        match class {
            MessageClass::Movement => {
                if slot.moves.spend(config.max_moves_per_window, window).fits {
                    Ok(())
                } else {
                    Err(DoSError::Throttled)
                }
            }
            MessageClass::Voice => {
                if slot.voice.spend(config.max_voice_signals_per_window, window).fits {
                    Ok(())
                } else {
                    Err(DoSError::Throttled)
                }
            }
            MessageClass::Chat => {
                let spend = slot.chat.spend(config.max_chat_per_window, window);
                if spend.clean_rollover {
                    slot.violations = 0;
                }
                if spend.fits {
                    return Ok(());
                }
                slot.violations += 1;
                if slot.violations >= config.violations_before_disconnect {
                    Err(DoSError::ViolationLimitExceeded)
                } else {
                    Err(DoSError::RateLimitExceeded)
                }
            }
        }
    }

    #[cfg(not(feature = "dos_ratelimit"))]
    #[inline]
    pub fn check_message(&mut self, _id: GuardId, _class: MessageClass) -> Result<(), DoSError> {
        Ok(())
    }

    pub fn connection_count(&self) -> usize {
        self.slots.len()
    }

    pub fn connections_from_ip(&self, ip: IpAddr) -> usize {
        self.per_ip.get(ip)
    }

    pub fn violation_count(&self, id: GuardId) -> u32 {
        self.slots.get(&id).map_or(0, |slot| slot.violations)
    }
}

impl Default for DoSProtection {
    fn default() -> Self {
        Self::new(DoSConfig::default())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DoSError {
    #[error("Server is at its connection limit")]
    TooManyConnections,
    #[error("Connection limit reached for this address")]
    TooManyConnectionsFromIp,
    #[error("Message of {0} bytes exceeds the size limit")]
    MessageTooLarge(usize),
    #[error("Update throttled")]
    Throttled,
    #[error("Chat rate limit exceeded")]
    RateLimitExceeded,
    #[error("Repeated rate limit violations")]
    ViolationLimitExceeded,
}

impl DoSError {
    /// Whether the connection should be closed
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DoSError::MessageTooLarge(_) | DoSError::ViolationLimitExceeded
        )
    }
}
