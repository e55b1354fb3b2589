//! Demo quote generator.
//!
//! Seeded random walk over a configured symbol list, with occasional
//! injected sequence gaps so the gap accounting has something to show.
//! Deterministic for a given seed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, warn};

use crate::model::Quote;
use crate::pipeline::Pipeline;
use crate::producer::QuoteProducer;

/// One injected gap roughly every this many ticks per symbol.
const GAP_ONE_IN: u32 = 200;

pub struct DemoProducer {
    symbols: Vec<String>,
    tick_interval: Duration,
    seed: u64,
}

struct WalkState {
    price: f64,
    open: f64,
    high: f64,
    low: f64,
    previous_close: f64,
    volume: u64,
    operations: u64,
    sequence: i64,
}

impl WalkState {
    fn new(price: f64) -> Self {
        Self {
            price,
            open: price,
            high: price,
            low: price,
            previous_close: price,
            volume: 0,
            operations: 0,
            sequence: 0,
        }
    }
}

impl DemoProducer {
    pub fn new(symbols: Vec<String>, tick_interval: Duration, seed: u64) -> Self {
        Self {
            symbols,
            tick_interval,
            seed,
        }
    }

    fn next_quote(state: &mut WalkState, rng: &mut ChaCha8Rng) -> Quote {
        let step: f64 = rng.gen_range(-0.003..0.003);
        state.price = (state.price * (1.0 + step)).max(0.01);
        state.high = state.high.max(state.price);
        state.low = state.low.min(state.price);
        state.volume += rng.gen_range(1..500);
        state.operations += 1;

        let spread = state.price * rng.gen_range(0.0002..0.002);
        Quote {
            bid: Some(state.price - spread / 2.0),
            bid_size: Some(rng.gen_range(1.0..100.0_f64).round()),
            ask: Some(state.price + spread / 2.0),
            ask_size: Some(rng.gen_range(1.0..100.0_f64).round()),
            last: Some(state.price),
            change: Some(state.price - state.previous_close),
            open: Some(state.open),
            high: Some(state.high),
            low: Some(state.low),
            previous_close: Some(state.previous_close),
            turnover: Some(state.volume as f64 * state.price),
            volume: Some(state.volume),
            operations: Some(state.operations),
            event_time: Utc::now(),
        }
    }
}

#[async_trait]
impl QuoteProducer for DemoProducer {
    async fn run(&self, pipeline: Arc<Pipeline>, shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let mut states: HashMap<String, WalkState> = self
            .symbols
            .iter()
            .map(|s| (s.clone(), WalkState::new(rng.gen_range(10.0..5_000.0))))
            .collect();

        info!(
            symbols = self.symbols.len(),
            interval_ms = self.tick_interval.as_millis() as u64,
            seed = self.seed,
            "demo producer started"
        );

        let mut ticker = interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        while !*shutdown.borrow() {
            ticker.tick().await;
            for (symbol, state) in states.iter_mut() {
                state.sequence += 1;
                if rng.gen_ratio(1, GAP_ONE_IN) {
                    // Skip one sequence number to exercise gap handling.
                    state.sequence += 1;
                }
                let quote = Self::next_quote(state, &mut rng);
                if let Err(error) = pipeline.process(symbol, quote, state.sequence) {
                    warn!(symbol = %symbol, error = %error, "tick rejected by dispatcher");
                }
            }
        }

        info!("demo producer stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn walk_quotes_are_well_formed() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let mut state = WalkState::new(100.0);
        for _ in 0..1_000 {
            let q = DemoProducer::next_quote(&mut state, &mut rng);
            let bid = q.bid.unwrap();
            let ask = q.ask.unwrap();
            assert!(bid < ask);
            assert!(q.last.unwrap() > 0.0);
            assert!(q.high.unwrap() >= q.low.unwrap());
        }
        // Volume and operation counts only grow.
        assert!(state.volume > 0);
        assert_eq!(state.operations, 1_000);
    }

    #[test]
    fn same_seed_same_walk() {
        let walk = |seed| {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let mut state = WalkState::new(100.0);
            (0..50)
                .map(|_| DemoProducer::next_quote(&mut state, &mut rng).last.unwrap())
                .collect::<Vec<_>>()
        };
        assert_eq!(walk(42), walk(42));
        assert_ne!(walk(42), walk(43));
    }
}
