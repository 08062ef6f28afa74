//! Client configuration.
//!
//! Every field has a default, so a configuration file only needs to mention what it
//! overrides.

use core::{
    num::{NonZeroU32, NonZeroU64, NonZeroUsize},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::{Error, WsUri};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server to stream to, `ws://host[:port][/path]`.
    pub uri: String,
    /// Failed handshake attempts tolerated before backing off.
    pub handshake_max_retry: NonZeroU32,
    pub handshake_retry_interval_ms: u64,
    /// Delay before reconnecting after losing an established connection.
    pub reconnect_delay_ms: u64,
    /// Delay applied once `handshake_max_retry` attempts failed in a row.
    pub reconnect_failed_delay_ms: u64,
    /// Resolution attempts per handshake attempt.
    pub dns_max_retry: NonZeroU32,
    pub dns_retry_interval_ms: u64,
    /// Connect, read and write timeout of every socket.
    pub socket_timeout_ms: NonZeroU64,
    /// Size of an audio frame, in bytes.
    pub frame_size: NonZeroUsize,
    /// Largest inbound payload accepted, bigger ones are drained and dropped.
    pub max_recv_payload: NonZeroUsize,
    /// Capacity of the capture to network queue, in frames.
    pub audio_in_capacity: NonZeroUsize,
    /// Capacity of the network to playback queue, in frames.
    pub audio_out_capacity: NonZeroUsize,
    pub playback_enqueue_timeout_ms: u64,
    /// Validate the upgrade response instead of accepting any reply.
    pub strict_handshake: bool,
    /// How often the supervisor checks the connection's liveness.
    pub watch_interval_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            uri: "ws://127.0.0.1:8080/websocket/1".to_owned(),
            handshake_max_retry: const { NonZeroU32::new(5).unwrap() },
            handshake_retry_interval_ms: 3000,
            reconnect_delay_ms: 5000,
            reconnect_failed_delay_ms: 10000,
            dns_max_retry: const { NonZeroU32::new(3).unwrap() },
            dns_retry_interval_ms: 1000,
            socket_timeout_ms: const { NonZeroU64::new(10000).unwrap() },
            frame_size: const { NonZeroUsize::new(2048).unwrap() },
            max_recv_payload: const { NonZeroUsize::new(2200).unwrap() },
            audio_in_capacity: const { NonZeroUsize::new(8).unwrap() },
            audio_out_capacity: const { NonZeroUsize::new(8).unwrap() },
            playback_enqueue_timeout_ms: 50,
            strict_handshake: false,
            watch_interval_ms: 1000,
        }
    }
}

impl ClientConfig {
    /// Checks the configuration for inconsistencies, returning the parsed URI.
    pub fn validate(&self) -> Result<WsUri, Error> {
        let uri = WsUri::parse(&self.uri)?;

        if self.max_recv_payload < self.frame_size {
            return Err(Error::InvalidConfig(format!(
                "max_recv_payload ({}) is smaller than frame_size ({})",
                self.max_recv_payload, self.frame_size,
            )));
        }

        Ok(uri)
    }

    #[inline(always)]
    pub const fn handshake_retry_interval(&self) -> Duration {
        Duration::from_millis(self.handshake_retry_interval_ms)
    }

    #[inline(always)]
    pub const fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    #[inline(always)]
    pub const fn reconnect_failed_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_failed_delay_ms)
    }

    #[inline(always)]
    pub const fn dns_retry_interval(&self) -> Duration {
        Duration::from_millis(self.dns_retry_interval_ms)
    }

    #[inline(always)]
    pub const fn socket_timeout(&self) -> Duration {
        Duration::from_millis(self.socket_timeout_ms.get())
    }

    #[inline(always)]
    pub const fn playback_enqueue_timeout(&self) -> Duration {
        Duration::from_millis(self.playback_enqueue_timeout_ms)
    }

    #[inline(always)]
    pub const fn watch_interval(&self) -> Duration {
        Duration::from_millis(self.watch_interval_ms)
    }
}
