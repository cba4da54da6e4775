use crate::core::ids::{SourceId, SourceType, StationId, Tile, INVALID_SOURCE};
use crate::core::payment::Money;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A homogeneous chunk of cargo in transit.
///
/// All units in a packet share their origin station, their age and the
/// next hop they are planned to travel through. A packet is owned by exactly
/// one cargo list at a time; moving it between lists moves the value.
///
/// Splitting and merging conserve both the unit count and the feeder share
/// exactly: a split hands a truncated proportional share to the new piece and
/// leaves the remainder on the original.
///
/// # Examples
///
/// ```
/// use distribution_engine::core::cargo_packet::CargoPacket;
/// use distribution_engine::core::ids::{SourceType, StationId, Tile};
/// use rust_decimal_macros::dec;
///
/// let mut packet = CargoPacket::new(StationId::new(0, 0), Tile::new(4, 4), 10, SourceType::Town, 7)
///     .with_feeder_share(dec!(100));
/// let piece = packet.split(3);
///
/// assert_eq!(piece.count(), 3);
/// assert_eq!(piece.feeder_share(), dec!(30));
/// assert_eq!(packet.count(), 7);
/// assert_eq!(packet.feeder_share(), dec!(70));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CargoPacket {
    count: u16,
    source: StationId,
    next: StationId,
    source_xy: Tile,
    loaded_at_xy: Tile,
    days_in_transit: u8,
    feeder_share: Money,
    source_type: SourceType,
    source_id: SourceId,
}

impl CargoPacket {
    /// Largest amount a single packet can hold.
    pub const MAX_COUNT: u32 = u16::MAX as u32;

    /// Create a freshly produced packet at `source`.
    ///
    /// # Panics
    ///
    /// Panics if `source` is invalid while `count` is non-zero.
    pub fn new(
        source: StationId,
        source_xy: Tile,
        count: u16,
        source_type: SourceType,
        source_id: SourceId,
    ) -> Self {
        assert!(
            source.is_valid() || count == 0,
            "cargo packet with invalid source must be empty, got count {}",
            count
        );
        Self {
            count,
            source,
            next: StationId::INVALID,
            source_xy,
            loaded_at_xy: source_xy,
            days_in_transit: 0,
            feeder_share: Decimal::ZERO,
            source_type,
            source_id,
        }
    }

    /// Set the accumulated feeder share.
    pub fn with_feeder_share(mut self, feeder_share: Money) -> Self {
        self.feeder_share = feeder_share;
        self
    }

    /// Set the transit age.
    pub fn with_days_in_transit(mut self, days: u8) -> Self {
        self.days_in_transit = days;
        self
    }

    /// Set where the packet was last loaded.
    pub fn with_loaded_at(mut self, loaded_at_xy: Tile) -> Self {
        self.loaded_at_xy = loaded_at_xy;
        self
    }

    // --- Accessors ---

    pub fn count(&self) -> u32 {
        self.count as u32
    }

    pub fn source(&self) -> StationId {
        self.source
    }

    /// Next hop this packet waits for at a station. Only meaningful while the
    /// packet sits in a station list.
    pub fn next(&self) -> StationId {
        self.next
    }

    pub fn source_xy(&self) -> Tile {
        self.source_xy
    }

    pub fn loaded_at_xy(&self) -> Tile {
        self.loaded_at_xy
    }

    pub fn days_in_transit(&self) -> u8 {
        self.days_in_transit
    }

    pub fn feeder_share(&self) -> Money {
        self.feeder_share
    }

    pub fn source_type(&self) -> SourceType {
        self.source_type
    }

    pub fn source_id(&self) -> SourceId {
        self.source_id
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    // --- Mutation ---

    /// Split off a new packet of `new_size` units.
    ///
    /// The new packet gets `feeder_share * new_size / count`, truncated to
    /// whole money units; the remainder stays here.
    ///
    /// # Panics
    ///
    /// Panics unless `0 < new_size < count`.
    pub fn split(&mut self, new_size: u32) -> CargoPacket {
        assert!(
            new_size > 0 && new_size < self.count(),
            "split size must be in 1..{}, got {}",
            self.count,
            new_size
        );
        let share = (self.feeder_share * Decimal::from(new_size) / Decimal::from(self.count)).trunc();
        self.feeder_share -= share;
        self.count -= new_size as u16;

        CargoPacket {
            count: new_size as u16,
            feeder_share: share,
            ..self.clone()
        }
    }

    /// Absorb `other` into this packet.
    ///
    /// # Panics
    ///
    /// Panics if the packets do not share their source and age, or if the
    /// merged count would exceed [`CargoPacket::MAX_COUNT`].
    pub fn merge(&mut self, other: CargoPacket) {
        assert!(self.same_source(&other), "cannot merge packets of different origin");
        assert!(
            self.count() + other.count() <= Self::MAX_COUNT,
            "merged packet would exceed {} units",
            Self::MAX_COUNT
        );
        self.count += other.count;
        self.feeder_share += other.feeder_share;
    }

    /// Whether two packets are interchangeable apart from count, feeder share
    /// and load position.
    pub fn same_source(&self, other: &CargoPacket) -> bool {
        self.source == other.source
            && self.source_xy == other.source_xy
            && self.days_in_transit == other.days_in_transit
            && self.source_type == other.source_type
            && self.source_id == other.source_id
    }

    /// Whether `other` can be merged into this packet.
    pub fn can_merge(&self, other: &CargoPacket) -> bool {
        self.same_source(other) && self.count() + other.count() <= Self::MAX_COUNT
    }

    pub fn add_feeder_share(&mut self, amount: Money) {
        self.feeder_share += amount;
    }

    pub(crate) fn set_next(&mut self, next: StationId) {
        self.next = next;
    }

    pub(crate) fn set_loaded_at(&mut self, xy: Tile) {
        self.loaded_at_xy = xy;
    }

    /// Age the packet by a day. Saturates at 255.
    pub(crate) fn age(&mut self) {
        self.days_in_transit = self.days_in_transit.saturating_add(1);
    }

    /// Forget the origin station after it was removed.
    pub(crate) fn invalidate_station(&mut self, station: StationId) {
        if self.source == station {
            self.source = StationId::INVALID;
        }
    }

    /// Forget the producer after it was removed.
    pub(crate) fn invalidate_source(&mut self, source_type: SourceType, source_id: SourceId) {
        if self.source_type == source_type && self.source_id == source_id {
            self.source_id = INVALID_SOURCE;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn packet(count: u16) -> CargoPacket {
        CargoPacket::new(StationId::new(1, 0), Tile::new(10, 10), count, SourceType::Industry, 3)
    }

    #[test]
    fn test_split_conserves_count_and_share() {
        let mut p = packet(10).with_feeder_share(dec!(10));
        let piece = p.split(3);
        assert_eq!(piece.count() + p.count(), 10);
        assert_eq!(piece.feeder_share() + p.feeder_share(), dec!(10));
        // 10 * 3 / 10 = 3 exactly
        assert_eq!(piece.feeder_share(), dec!(3));
    }

    #[test]
    fn test_split_rounds_toward_original() {
        let mut p = packet(3).with_feeder_share(dec!(10));
        let piece = p.split(1);
        assert_eq!(piece.feeder_share(), dec!(3));
        assert_eq!(p.feeder_share(), dec!(7));
    }

    #[test]
    fn test_split_keeps_provenance() {
        let mut p = packet(8).with_days_in_transit(12).with_loaded_at(Tile::new(1, 2));
        let piece = p.split(2);
        assert!(piece.same_source(&p));
        assert_eq!(piece.loaded_at_xy(), Tile::new(1, 2));
        assert_eq!(piece.days_in_transit(), 12);
    }

    #[test]
    #[should_panic(expected = "split size")]
    fn test_split_whole_packet_panics() {
        packet(5).split(5);
    }

    #[test]
    #[should_panic(expected = "split size")]
    fn test_split_zero_panics() {
        packet(5).split(0);
    }

    #[test]
    fn test_merge_sums_exactly() {
        let mut a = packet(100).with_feeder_share(dec!(12.5));
        let b = packet(50).with_feeder_share(dec!(7.5));
        a.merge(b);
        assert_eq!(a.count(), 150);
        assert_eq!(a.feeder_share(), dec!(20));
    }

    #[test]
    #[should_panic(expected = "different origin")]
    fn test_merge_different_age_panics() {
        let mut a = packet(1);
        a.merge(packet(1).with_days_in_transit(4));
    }

    #[test]
    #[should_panic(expected = "exceed")]
    fn test_merge_overflow_panics() {
        let mut a = packet(u16::MAX);
        a.merge(packet(1));
    }

    #[test]
    fn test_can_merge_respects_ceiling() {
        let a = packet(u16::MAX - 5);
        assert!(a.can_merge(&packet(5)));
        assert!(!a.can_merge(&packet(6)));
    }

    #[test]
    #[should_panic(expected = "invalid source")]
    fn test_invalid_source_requires_empty() {
        CargoPacket::new(StationId::INVALID, Tile::default(), 1, SourceType::Town, 0);
    }

    #[test]
    fn test_empty_invalid_packet_allowed() {
        let p = CargoPacket::new(StationId::INVALID, Tile::default(), 0, SourceType::Town, 0);
        assert!(p.is_empty());
    }

    #[test]
    fn test_age_saturates() {
        let mut p = packet(1).with_days_in_transit(254);
        p.age();
        p.age();
        assert_eq!(p.days_in_transit(), 255);
    }

    #[test]
    fn test_invalidate_source() {
        let mut p = packet(1);
        p.invalidate_source(SourceType::Town, 3);
        assert_eq!(p.source_id(), 3);
        p.invalidate_source(SourceType::Industry, 3);
        assert_eq!(p.source_id(), INVALID_SOURCE);
    }
}
