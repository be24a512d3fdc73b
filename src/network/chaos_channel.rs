//! Fault injection for any [`DatagramChannel`].
//!
//! [`ChaosChannel`] wraps an inner channel and drops, duplicates and reorders
//! datagrams according to a [`ChaosConfig`]. With a fixed seed the injected
//! faults are reproducible, which is what the handshake tests rely on.
//!
//! ```
//! use quickdraw_sync::{ChaosChannel, ChaosConfig, LoopbackChannel};
//!
//! let config = ChaosConfig::builder()
//!     .packet_loss_rate(0.2)
//!     .duplication_rate(0.1)
//!     .seed(42)
//!     .build();
//! let chaos: ChaosChannel<u32, _> = ChaosChannel::new(LoopbackChannel::<u32>::new(), config);
//! assert_eq!(chaos.stats().datagrams_sent, 0);
//! ```

use std::collections::VecDeque;

use crate::rng::{Pcg32, Rng, SeedableRng};
use crate::{ChannelEndpoint, DatagramChannel, QuickdrawError, RECEIVE_BUFFER_SIZE};

/// Fault rates. Everything defaults to zero (passthrough).
#[derive(Debug, Clone, PartialEq)]
pub struct ChaosConfig {
    /// Probability of dropping a datagram on send.
    pub send_loss_rate: f64,
    /// Probability of dropping a datagram on receive.
    pub receive_loss_rate: f64,
    /// Probability of sending a datagram twice.
    pub duplication_rate: f64,
    /// Probability that a receive returns a later queued datagram first.
    pub reorder_rate: f64,
    /// Probability of starting a burst of consecutive send losses.
    pub burst_loss_probability: f64,
    /// Datagrams dropped per burst.
    pub burst_loss_length: usize,
    /// Seed for reproducible faults; `None` draws from entropy.
    pub seed: Option<u64>,
}

impl Default for ChaosConfig {
    fn default() -> Self {
        Self {
            send_loss_rate: 0.0,
            receive_loss_rate: 0.0,
            duplication_rate: 0.0,
            reorder_rate: 0.0,
            burst_loss_probability: 0.0,
            burst_loss_length: 0,
            seed: None,
        }
    }
}

impl ChaosConfig {
    /// Fluent construction.
    #[must_use]
    pub fn builder() -> ChaosConfigBuilder {
        ChaosConfigBuilder::default()
    }

    /// No faults.
    #[must_use]
    pub fn passthrough() -> Self {
        Self::default()
    }

    /// Symmetric loss at `rate` in both directions.
    #[must_use]
    pub fn lossy(rate: f64) -> Self {
        Self {
            send_loss_rate: rate,
            receive_loss_rate: rate,
            ..Self::default()
        }
    }
}

/// Builder returned by [`ChaosConfig::builder`].
#[derive(Debug, Clone, Default)]
#[must_use]
pub struct ChaosConfigBuilder {
    config: ChaosConfig,
}

impl ChaosConfigBuilder {
    /// Sets both send and receive loss.
    pub fn packet_loss_rate(mut self, rate: f64) -> Self {
        self.config.send_loss_rate = rate;
        self.config.receive_loss_rate = rate;
        self
    }

    /// Sets send-side loss only.
    pub fn send_loss_rate(mut self, rate: f64) -> Self {
        self.config.send_loss_rate = rate;
        self
    }

    /// Sets receive-side loss only.
    pub fn receive_loss_rate(mut self, rate: f64) -> Self {
        self.config.receive_loss_rate = rate;
        self
    }

    /// Sets the duplication probability.
    pub fn duplication_rate(mut self, rate: f64) -> Self {
        self.config.duplication_rate = rate;
        self
    }

    /// Sets the reorder probability.
    pub fn reorder_rate(mut self, rate: f64) -> Self {
        self.config.reorder_rate = rate;
        self
    }

    /// Enables burst loss.
    pub fn burst_loss(mut self, probability: f64, length: usize) -> Self {
        self.config.burst_loss_probability = probability;
        self.config.burst_loss_length = length;
        self
    }

    /// Fixes the fault sequence.
    pub fn seed(mut self, seed: u64) -> Self {
        self.config.seed = Some(seed);
        self
    }

    /// Finishes the builder.
    #[must_use]
    pub fn build(self) -> ChaosConfig {
        self.config
    }
}

/// Counters for injected faults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChaosStats {
    /// `send_to` calls seen.
    pub datagrams_sent: u64,
    /// Dropped on send (random loss).
    pub dropped_send: u64,
    /// Dropped on send during a burst.
    pub dropped_burst: u64,
    /// Extra copies sent.
    pub duplicated: u64,
    /// Datagrams pulled from the inner channel.
    pub datagrams_received: u64,
    /// Dropped on receive.
    pub dropped_receive: u64,
    /// Receives that skipped ahead of the queue head.
    pub reordered: u64,
}

/// A [`DatagramChannel`] wrapper that injects faults.
#[derive(Debug)]
pub struct ChaosChannel<I, C> {
    inner: C,
    config: ChaosConfig,
    rng: Pcg32,
    inbox: VecDeque<(I, Vec<u8>)>,
    burst_remaining: usize,
    stats: ChaosStats,
}

impl<I, C> ChaosChannel<I, C>
where
    C: DatagramChannel<I>,
{
    /// Wraps `inner`.
    pub fn new(inner: C, config: ChaosConfig) -> Self {
        let rng = config
            .seed
            .map_or_else(Pcg32::from_entropy, Pcg32::seed_from_u64);
        Self {
            inner,
            config,
            rng,
            inbox: VecDeque::new(),
            burst_remaining: 0,
            stats: ChaosStats::default(),
        }
    }

    /// The wrapped channel.
    pub fn inner(&self) -> &C {
        &self.inner
    }

    /// Current fault configuration.
    pub fn config(&self) -> &ChaosConfig {
        &self.config
    }

    /// Replaces the fault configuration; the RNG keeps its position.
    pub fn set_config(&mut self, config: ChaosConfig) {
        self.config = config;
    }

    /// Fault counters.
    pub fn stats(&self) -> ChaosStats {
        self.stats
    }

    fn roll(&mut self, rate: f64) -> bool {
        rate > 0.0 && self.rng.gen_bool(rate)
    }

    fn drop_in_burst(&mut self) -> bool {
        if self.burst_remaining > 0 {
            self.burst_remaining -= 1;
            self.stats.dropped_burst += 1;
            return true;
        }
        if self.config.burst_loss_length > 0 && self.roll(self.config.burst_loss_probability) {
            self.burst_remaining = self.config.burst_loss_length - 1;
            self.stats.dropped_burst += 1;
            return true;
        }
        false
    }

    fn refill(&mut self, local: &I, channel: &str) -> Result<(), QuickdrawError> {
        let mut scratch = [0u8; RECEIVE_BUFFER_SIZE];
        while let Some((from, len)) = self.inner.try_receive(local, channel, &mut scratch)? {
            self.stats.datagrams_received += 1;
            if self.roll(self.config.receive_loss_rate) {
                self.stats.dropped_receive += 1;
                continue;
            }
            let payload = scratch.get(..len).unwrap_or_default().to_vec();
            self.inbox.push_back((from, payload));
        }
        Ok(())
    }
}

impl<I, C> DatagramChannel<I> for ChaosChannel<I, C>
where
    I: PartialEq,
    C: DatagramChannel<I>,
{
    fn accept_incoming(&mut self, endpoint: &ChannelEndpoint<I>) -> Result<(), QuickdrawError> {
        self.inner.accept_incoming(endpoint)
    }

    fn send_to(
        &mut self,
        endpoint: &ChannelEndpoint<I>,
        payload: &[u8],
    ) -> Result<(), QuickdrawError> {
        self.stats.datagrams_sent += 1;
        if self.drop_in_burst() {
            return Ok(());
        }
        if self.roll(self.config.send_loss_rate) {
            self.stats.dropped_send += 1;
            return Ok(());
        }
        self.inner.send_to(endpoint, payload)?;
        if self.roll(self.config.duplication_rate) {
            self.stats.duplicated += 1;
            self.inner.send_to(endpoint, payload)?;
        }
        Ok(())
    }

    fn try_receive(
        &mut self,
        local: &I,
        channel: &str,
        buf: &mut [u8],
    ) -> Result<Option<(I, usize)>, QuickdrawError> {
        self.refill(local, channel)?;
        let pick = if self.inbox.len() > 1 && self.roll(self.config.reorder_rate) {
            self.stats.reordered += 1;
            self.rng.gen_range(1..self.inbox.len() as u32) as usize
        } else {
            0
        };
        let Some((from, payload)) = self.inbox.remove(pick) else {
            return Ok(None);
        };
        let len = payload.len().min(buf.len());
        if let (Some(dst), Some(src)) = (buf.get_mut(..len), payload.get(..len)) {
            dst.copy_from_slice(src);
        }
        Ok(Some((from, len)))
    }

    fn close(&mut self, endpoint: &ChannelEndpoint<I>) {
        self.inbox.retain(|(from, _)| from != &endpoint.remote);
        self.inner.close(endpoint);
    }
}
