//! Bar sources for the control loop.

use reverter_core::domain::Bar;

use crate::broker::{Broker, BrokerError, Transport};
use crate::oracle::PositionOracle;

/// Produces the latest bar for the traded instrument.
pub trait BarSource {
    fn latest_bar<T: Transport>(
        &mut self,
        broker: &Broker<T>,
        oracle: &mut PositionOracle,
        symbol: &str,
    ) -> Result<Bar, BrokerError>;

    fn name(&self) -> &str;
}

/// Flat O=H=L=C bar from the position snapshot's `currentPrice`, stamped now.
///
/// The broker exposes no market-data endpoint, so the seeded position record
/// doubles as the price feed.
#[derive(Debug, Clone, Copy, Default)]
pub struct SnapshotBars;

impl BarSource for SnapshotBars {
    fn latest_bar<T: Transport>(
        &mut self,
        broker: &Broker<T>,
        oracle: &mut PositionOracle,
        symbol: &str,
    ) -> Result<Bar, BrokerError> {
        let snapshot = oracle.latest_snapshot(broker, symbol)?;
        Ok(Bar::from_price(broker.clock().now(), snapshot.current_price))
    }

    fn name(&self) -> &str {
        "position-snapshot"
    }
}
