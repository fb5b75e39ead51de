//! Demo upstream publisher.
//!
//! Binds a ZeroMQ PUB socket and emits simulated order-book and trade
//! messages so the relay can be run end to end without the matching engine.

use std::collections::BTreeMap;
use std::time::Duration;

use clap::Parser;
use rand::Rng;
use serde_json::json;
use zeromq::{PubSocket, Socket, SocketSend, ZmqMessage};

#[derive(Parser)]
#[command(name = "feed-publisher")]
#[command(about = "Publish a simulated market feed over ZeroMQ", long_about = None)]
struct Cli {
    /// Endpoint to bind the PUB socket to.
    #[arg(short, long, default_value = "tcp://0.0.0.0:5555")]
    bind: String,

    /// Delay between simulated orders in milliseconds.
    #[arg(short, long, default_value_t = 500)]
    interval_ms: u64,
}

/// Resting quantity per price level, keyed in cents.
#[derive(Default)]
struct Book {
    bids: BTreeMap<u64, u32>,
    asks: BTreeMap<u64, u32>,
}

impl Book {
    /// Add an order and cross it against the opposite side.
    /// Returns the trades as (price in cents, quantity).
    fn add(&mut self, buy: bool, price: u64, mut quantity: u32) -> Vec<(u64, u32)> {
        let mut trades = Vec::new();
        while quantity > 0 {
            let best = if buy {
                self.asks.iter_mut().next().filter(|(p, _)| **p <= price)
            } else {
                self.bids.iter_mut().next_back().filter(|(p, _)| **p >= price)
            };
            let Some((&level, resting)) = best else { break };

            let traded = quantity.min(*resting);
            *resting -= traded;
            quantity -= traded;
            trades.push((level, traded));
            if *resting == 0 {
                if buy {
                    self.asks.remove(&level);
                } else {
                    self.bids.remove(&level);
                }
            }
        }
        if quantity > 0 {
            let side = if buy { &mut self.bids } else { &mut self.asks };
            *side.entry(price).or_default() += quantity;
        }
        trades
    }

    fn snapshot(&self) -> serde_json::Value {
        let level = |(price, qty): (&u64, &u32)| json!([format!("{:.2}", *price as f64 / 100.0), qty]);
        json!({
            "type": "book",
            "payload": {
                "bids": self.bids.iter().rev().map(level).collect::<Vec<_>>(),
                "asks": self.asks.iter().map(level).collect::<Vec<_>>(),
            }
        })
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let mut socket = PubSocket::new();
    socket.bind(&cli.bind).await?;
    tracing::info!(endpoint = %cli.bind, "Publisher bound");

    let mut book = Book::default();
    let mut ticker = tokio::time::interval(Duration::from_millis(cli.interval_ms.max(1)));
    let mut order_id: u64 = 0;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => break,
        }

        order_id += 1;
        let buy = order_id % 2 == 0;
        let (price, quantity) = {
            let mut rng = rand::thread_rng();
            (rng.gen_range(9900..=10100u64), rng.gen_range(1..=100u32))
        };
        tracing::debug!(order_id, buy, price, quantity, "New order");

        for (price, quantity) in book.add(buy, price, quantity) {
            let trade = json!({
                "type": "trade",
                "payload": { "price": price as f64 / 100.0, "quantity": quantity }
            });
            socket.send(ZmqMessage::from(trade.to_string())).await?;
        }
        socket.send(ZmqMessage::from(book.snapshot().to_string())).await?;
    }

    tracing::info!("Publisher stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crossing_order_trades_at_resting_price() {
        let mut book = Book::default();
        assert!(book.add(false, 10000, 10).is_empty());
        assert!(book.add(false, 10050, 5).is_empty());

        let trades = book.add(true, 10060, 12);
        assert_eq!(trades, vec![(10000, 10), (10050, 2)]);
        assert_eq!(book.asks.get(&10050), Some(&3));
        assert!(book.bids.is_empty());
    }

    #[test]
    fn non_crossing_order_rests() {
        let mut book = Book::default();
        book.add(true, 9950, 7);
        assert!(book.add(false, 10000, 4).is_empty());

        let snapshot = book.snapshot();
        assert_eq!(snapshot["type"], "book");
        assert_eq!(snapshot["payload"]["bids"][0][0], "99.50");
        assert_eq!(snapshot["payload"]["asks"][0][1], 4);
    }
}
