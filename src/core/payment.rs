use crate::core::cargo_packet::CargoPacket;
use crate::core::ids::Tile;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Money amounts: feeder shares, income.
pub type Money = Decimal;

/// Settles cargo payments while a vehicle unloads.
///
/// The economy layer owns the actual rates; the cargo lists only report which
/// units were delivered or transferred.
pub trait CargoPayment {
    /// `count` units of `packet` reached their destination.
    fn pay_final_delivery(&mut self, packet: &CargoPacket, count: u32);

    /// `count` units of `packet` were handed over to the station for another
    /// vehicle. Returns the feeder share credited to those units.
    fn pay_transfer(&mut self, packet: &CargoPacket, count: u32) -> Money;
}

/// Pays a flat rate per unit and tile travelled.
///
/// Transfers credit the leg from the packet's load position to the current
/// station as feeder share. A final delivery pays for the whole trip from the
/// packet's source and deducts the feeder share already credited.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistancePayment {
    /// Where the unloading happens.
    pub station_xy: Tile,
    /// Income per cargo unit per tile.
    pub rate: Money,
    /// Income booked for the unloading vehicle's owner.
    pub route_profit: Money,
    /// Feeder share credited by transfers (not yet income).
    pub visual_transfer: Money,
    pub delivered: u32,
    pub transferred: u32,
}

impl DistancePayment {
    pub fn new(station_xy: Tile, rate: Money) -> Self {
        Self {
            station_xy,
            rate,
            route_profit: Decimal::ZERO,
            visual_transfer: Decimal::ZERO,
            delivered: 0,
            transferred: 0,
        }
    }

    fn leg_income(&self, from: Tile, count: u32) -> Money {
        self.rate * Decimal::from(count) * Decimal::from(from.manhattan(&self.station_xy))
    }
}

impl CargoPayment for DistancePayment {
    fn pay_final_delivery(&mut self, packet: &CargoPacket, count: u32) {
        // `count` is always the whole packet here, so its feeder share is settled in full
        let income = self.leg_income(packet.source_xy(), count);
        self.route_profit += income - packet.feeder_share();
        self.delivered += count;
    }

    fn pay_transfer(&mut self, packet: &CargoPacket, count: u32) -> Money {
        let share = self.leg_income(packet.loaded_at_xy(), count);
        self.visual_transfer += share;
        self.transferred += count;
        share
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ids::{SourceType, StationId};
    use rust_decimal_macros::dec;

    #[test]
    fn test_transfer_pays_leg_from_load_position() {
        let mut payment = DistancePayment::new(Tile::new(10, 0), dec!(0.5));
        let packet = CargoPacket::new(StationId::new(0, 0), Tile::new(0, 0), 4, SourceType::Town, 0)
            .with_loaded_at(Tile::new(6, 0));
        let share = payment.pay_transfer(&packet, 4);
        assert_eq!(share, dec!(8)); // 4 units * 4 tiles * 0.5
        assert_eq!(payment.transferred, 4);
        assert_eq!(payment.route_profit, Decimal::ZERO);
    }

    #[test]
    fn test_delivery_deducts_feeder_share() {
        let mut payment = DistancePayment::new(Tile::new(10, 0), dec!(1));
        let packet = CargoPacket::new(StationId::new(0, 0), Tile::new(0, 0), 2, SourceType::Town, 0)
            .with_feeder_share(dec!(5));
        payment.pay_final_delivery(&packet, 2);
        assert_eq!(payment.route_profit, dec!(15));
        assert_eq!(payment.delivered, 2);
    }
}
