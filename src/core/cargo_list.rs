use crate::core::cargo_packet::CargoPacket;
use crate::core::goods::{FlowStatMap, FlowStatSet, GoodsEntry};
use crate::core::ids::{SourceId, SourceType, StationId, Tile, VehicleId};
use crate::core::payment::{CargoPayment, Money};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

/// Aggregates over a packet set, kept in step with every mutation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct CargoCache {
    count: u32,
    feeder_share: Money,
    days_in_transit: u64,
}

impl CargoCache {
    fn add(&mut self, packet: &CargoPacket) {
        self.count += packet.count();
        self.feeder_share += packet.feeder_share();
        self.days_in_transit += packet.days_in_transit() as u64 * packet.count() as u64;
    }

    fn remove(&mut self, packet: &CargoPacket) {
        self.count -= packet.count();
        self.feeder_share -= packet.feeder_share();
        self.days_in_transit -= packet.days_in_transit() as u64 * packet.count() as u64;
    }

    fn rebuild<'a>(packets: impl Iterator<Item = &'a CargoPacket>) -> Self {
        let mut cache = Self::default();
        for packet in packets {
            cache.add(packet);
        }
        cache
    }

    fn average_days(&self) -> u32 {
        if self.count == 0 {
            0
        } else {
            (self.days_in_transit / self.count as u64) as u32
        }
    }
}

/// Unload-related bits of a vehicle order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderUnloadFlags {
    /// Force unloading everything, delivering where possible.
    pub unload: bool,
    /// Force transferring everything.
    pub transfer: bool,
    /// Do not unload at all.
    pub no_unload: bool,
}

/// Order flags combined with the station's acceptance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnloadFlags {
    pub deliver: bool,
    pub transfer: bool,
    pub accepted: bool,
}

impl UnloadFlags {
    pub fn new(order: OrderUnloadFlags, accepted: bool) -> Self {
        Self {
            deliver: order.unload,
            transfer: order.transfer,
            accepted,
        }
    }
}

/// What happens to a packet when its vehicle stops at a station.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnloadType {
    Keep,
    Deliver,
    Transfer,
}

/// Where a vehicle unloads and where it heads next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnloadDescription {
    pub curr_station: StationId,
    /// The vehicle's next stop, `INVALID` if its orders don't determine it.
    pub next_station: StationId,
    pub flags: UnloadFlags,
}

/// Split `packet` so that the returned front piece holds at most `max` units.
fn split_front(mut packet: CargoPacket, max: u32) -> (CargoPacket, Option<CargoPacket>) {
    if packet.count() <= max {
        (packet, None)
    } else {
        let piece = packet.split(max);
        (piece, Some(packet))
    }
}

/// Append with opportunistic merging against the queue's tail.
fn merge_or_push(queue: &mut VecDeque<CargoPacket>, packet: CargoPacket) {
    match queue.iter_mut().rev().find(|p| p.can_merge(&packet)) {
        Some(existing) => existing.merge(packet),
        None => queue.push_back(packet),
    }
}

/// Cargo aboard one vehicle.
///
/// Packets keep their load order. The aggregates returned by [`count`],
/// [`feeder_share`] and [`days_in_transit`] are cached; every mutating method
/// refreshes them, and direct packet edits go through [`modify_packets`].
///
/// [`count`]: VehicleCargoList::count
/// [`feeder_share`]: VehicleCargoList::feeder_share
/// [`days_in_transit`]: VehicleCargoList::days_in_transit
/// [`modify_packets`]: VehicleCargoList::modify_packets
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<CargoPacket>", into = "Vec<CargoPacket>")]
pub struct VehicleCargoList {
    packets: VecDeque<CargoPacket>,
    cache: CargoCache,
}

impl From<Vec<CargoPacket>> for VehicleCargoList {
    fn from(packets: Vec<CargoPacket>) -> Self {
        let mut list = Self {
            packets: packets.into_iter().filter(|p| !p.is_empty()).collect(),
            cache: CargoCache::default(),
        };
        list.invalidate_cache();
        list
    }
}

impl From<VehicleCargoList> for Vec<CargoPacket> {
    fn from(list: VehicleCargoList) -> Self {
        list.packets.into()
    }
}

impl VehicleCargoList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> u32 {
        self.cache.count
    }

    pub fn feeder_share(&self) -> Money {
        self.cache.feeder_share
    }

    /// Average transit age over all units aboard.
    pub fn days_in_transit(&self) -> u32 {
        self.cache.average_days()
    }

    /// Origin of the first packet, `INVALID` when empty.
    pub fn source(&self) -> StationId {
        self.packets.front().map_or(StationId::INVALID, CargoPacket::source)
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    pub fn packet_count(&self) -> usize {
        self.packets.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CargoPacket> {
        self.packets.iter()
    }

    /// Recompute the cached aggregates from the packets.
    pub fn invalidate_cache(&mut self) {
        self.cache = CargoCache::rebuild(self.packets.iter());
    }

    /// Edit packets in place. Emptied packets are dropped and the cache is
    /// rebuilt afterwards.
    pub fn modify_packets<F>(&mut self, edit: F)
    where
        F: FnOnce(&mut VecDeque<CargoPacket>),
    {
        edit(&mut self.packets);
        self.packets.retain(|p| !p.is_empty());
        self.invalidate_cache();
    }

    /// Add a packet, merging it into a compatible one where possible.
    ///
    /// # Panics
    ///
    /// Panics if the packet is empty.
    pub fn append(&mut self, packet: CargoPacket) {
        assert!(!packet.is_empty(), "cannot append an empty cargo packet");
        self.cache.add(&packet);
        merge_or_push(&mut self.packets, packet);
    }

    /// Age all cargo aboard by one day.
    pub fn age_cargo(&mut self) {
        self.modify_packets(|packets| packets.iter_mut().for_each(CargoPacket::age));
    }

    /// Drop cargo from the back until at most `max_remaining` units are left.
    /// Returns the amount dropped.
    pub fn truncate(&mut self, max_remaining: u32) -> u32 {
        let mut excess = self.count().saturating_sub(max_remaining);
        let dropped = excess;
        while excess > 0 {
            let Some(mut packet) = self.packets.pop_back() else { break };
            if packet.count() > excess {
                let keep = packet.count() - excess;
                let front = packet.split(keep);
                self.cache.remove(&packet);
                self.packets.push_back(front);
                excess = 0;
            } else {
                excess -= packet.count();
                self.cache.remove(&packet);
            }
        }
        dropped
    }

    /// Move up to `max_move` units, oldest first, into another vehicle.
    pub fn move_to_other_vehicle(&mut self, dest: &mut VehicleCargoList, max_move: u32) -> u32 {
        let mut moved = 0;
        while moved < max_move {
            let Some(packet) = self.packets.pop_front() else { break };
            let (piece, rest) = split_front(packet, max_move - moved);
            if let Some(rest) = rest {
                self.packets.push_front(rest);
            }
            self.cache.remove(&piece);
            moved += piece.count();
            dest.append(piece);
        }
        moved
    }

    /// Decide what to do with `packet` at the described stop.
    ///
    /// Pure function of its inputs. If the destination has a routing plan for
    /// the packet's origin, the plan decides (overridable by explicit
    /// unload/transfer orders); otherwise the order flags alone decide.
    pub fn will_unload(desc: &UnloadDescription, flows: &FlowStatMap, packet: &CargoPacket) -> UnloadType {
        let via = flows
            .get(&packet.source())
            .and_then(FlowStatSet::first_via)
            .unwrap_or(StationId::INVALID);
        if via.is_valid() {
            Self::will_unload_by_plan(desc, via, packet.source())
        } else {
            Self::will_unload_by_order(desc, packet.source())
        }
    }

    fn will_unload_by_order(desc: &UnloadDescription, source: StationId) -> UnloadType {
        let flags = desc.flags;
        if !(flags.deliver || flags.accepted || flags.transfer) {
            return UnloadType::Keep;
        }
        if flags.accepted && !flags.transfer && source != desc.curr_station {
            UnloadType::Deliver
        } else if flags.deliver || flags.transfer {
            UnloadType::Transfer
        } else {
            // accepted at the packet's own source station without a forcing order
            UnloadType::Keep
        }
    }

    fn will_unload_by_plan(desc: &UnloadDescription, via: StationId, source: StationId) -> UnloadType {
        let flags = desc.flags;
        if via == desc.curr_station {
            if flags.transfer {
                UnloadType::Transfer
            } else if flags.accepted {
                UnloadType::Deliver
            } else if flags.deliver {
                UnloadType::Transfer
            } else {
                UnloadType::Keep
            }
        } else if flags.deliver {
            // the player overrides the plan
            Self::will_unload_by_order(desc, source)
        } else if flags.transfer {
            UnloadType::Transfer
        } else if via == desc.next_station || !desc.next_station.is_valid() {
            UnloadType::Keep
        } else {
            UnloadType::Transfer
        }
    }

    /// Unload up to `max_unload` units at `curr_station` into `dest`.
    ///
    /// Delivered cargo is paid and destroyed, transferred cargo is credited
    /// its feeder share and queued at the station for its next hop, kept
    /// cargo stays aboard. Flow statistics of `dest` record every decision.
    /// Returns the amount delivered plus transferred.
    pub fn move_to_station(
        &mut self,
        dest: &mut GoodsEntry,
        max_unload: u32,
        order: OrderUnloadFlags,
        curr_station: StationId,
        next_station: StationId,
        payment: &mut dyn CargoPayment,
    ) -> u32 {
        if order.no_unload {
            return 0;
        }
        let desc = UnloadDescription {
            curr_station,
            next_station,
            flags: UnloadFlags::new(order, dest.accepts()),
        };

        let mut remaining = max_unload;
        let mut transferred = false;
        let mut kept = VecDeque::with_capacity(self.packets.len());
        let mut pending = std::mem::take(&mut self.packets);

        while let Some(packet) = pending.pop_front() {
            if remaining == 0 {
                kept.push_back(packet);
                continue;
            }
            let source = packet.source();
            let via = dest.via(source);
            match Self::will_unload(&desc, &dest.flows, &packet) {
                UnloadType::Deliver => {
                    let (piece, rest) = split_front(packet, remaining);
                    kept.extend(rest);
                    let count = piece.count();
                    payment.pay_final_delivery(&piece, count);
                    if via.is_valid() {
                        dest.update_flow_stats(source, count, curr_station);
                    }
                    remaining -= count;
                }
                UnloadType::Transfer => {
                    let (mut piece, rest) = split_front(packet, remaining);
                    kept.extend(rest);
                    let count = piece.count();
                    let next_hop = if via == curr_station {
                        dest.update_flow_stats_transfer(source, count, curr_station)
                    } else {
                        dest.update_flow_stats(source, count, via);
                        via
                    };
                    let share = payment.pay_transfer(&piece, count);
                    piece.add_feeder_share(share);
                    dest.cargo.append(next_hop, piece);
                    transferred = true;
                    remaining -= count;
                }
                UnloadType::Keep => {
                    if via.is_valid() && next_station.is_valid() {
                        dest.update_flow_stats(source, packet.count(), next_station);
                    }
                    kept.push_back(packet);
                }
            }
        }

        self.packets = kept;
        self.invalidate_cache();
        if transferred {
            dest.acceptance_pickup.pickup = true;
        }
        max_unload - remaining
    }

    /// Forget a removed origin station on all packets aboard.
    pub fn invalidate_station(&mut self, station: StationId) {
        self.modify_packets(|packets| packets.iter_mut().for_each(|p| p.invalidate_station(station)));
    }

    /// Forget a removed producer on all packets aboard.
    pub fn invalidate_source(&mut self, source_type: SourceType, source_id: SourceId) {
        self.modify_packets(|packets| {
            packets
                .iter_mut()
                .for_each(|p| p.invalidate_source(source_type, source_id))
        });
    }
}

/// Persisted form of a station list; packets carry their own next hop.
#[derive(Serialize, Deserialize)]
struct StationCargoData {
    packets: Vec<CargoPacket>,
    reserved: BTreeMap<VehicleId, Vec<CargoPacket>>,
}

/// Cargo waiting at one station, keyed by the next hop it waits for.
///
/// Packets keyed `INVALID` can be loaded by any vehicle. Vehicles reserve
/// cargo before loading it; reserved packets leave the waiting set, so two
/// vehicles can never claim the same units.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "StationCargoData", into = "StationCargoData")]
pub struct StationCargoList {
    packets: BTreeMap<StationId, VecDeque<CargoPacket>>,
    reserved: BTreeMap<VehicleId, VecDeque<CargoPacket>>,
    reserved_amounts: BTreeMap<VehicleId, u32>,
    cache: CargoCache,
    reserved_count: u32,
}

impl From<StationCargoData> for StationCargoList {
    fn from(data: StationCargoData) -> Self {
        let mut list = StationCargoList::default();
        for packet in data.packets.into_iter().filter(|p| !p.is_empty()) {
            list.packets.entry(packet.next()).or_default().push_back(packet);
        }
        for (vehicle, packets) in data.reserved {
            let queue: VecDeque<CargoPacket> = packets.into_iter().filter(|p| !p.is_empty()).collect();
            if !queue.is_empty() {
                list.reserved.insert(vehicle, queue);
            }
        }
        list.invalidate_cache();
        list
    }
}

impl From<StationCargoList> for StationCargoData {
    fn from(list: StationCargoList) -> Self {
        StationCargoData {
            packets: list.packets.into_values().flatten().collect(),
            reserved: list
                .reserved
                .into_iter()
                .map(|(vehicle, queue)| (vehicle, queue.into()))
                .collect(),
        }
    }
}

impl StationCargoList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waiting (unreserved) amount.
    pub fn count(&self) -> u32 {
        self.cache.count
    }

    /// Waiting amount destined via `next`.
    pub fn count_for(&self, next: StationId) -> u32 {
        self.packets
            .get(&next)
            .map_or(0, |queue| queue.iter().map(CargoPacket::count).sum())
    }

    pub fn reserved_count(&self) -> u32 {
        self.reserved_count
    }

    pub fn reserved_for(&self, vehicle: VehicleId) -> u32 {
        self.reserved_amounts.get(&vehicle).copied().unwrap_or(0)
    }

    pub fn feeder_share(&self) -> Money {
        self.cache.feeder_share
    }

    pub fn days_in_transit(&self) -> u32 {
        self.cache.average_days()
    }

    /// Origin of the first waiting packet, `INVALID` when none waits.
    pub fn source(&self) -> StationId {
        self.iter().next().map_or(StationId::INVALID, CargoPacket::source)
    }

    /// No cargo waiting and none reserved.
    pub fn is_empty(&self) -> bool {
        self.packets.is_empty() && self.reserved.is_empty()
    }

    /// Waiting packets ordered by next hop.
    pub fn iter(&self) -> impl Iterator<Item = &CargoPacket> {
        self.packets.values().flatten()
    }

    pub fn iter_reserved(&self) -> impl Iterator<Item = (VehicleId, &CargoPacket)> {
        self.reserved
            .iter()
            .flat_map(|(vehicle, queue)| queue.iter().map(move |p| (*vehicle, p)))
    }

    /// Next hops with waiting cargo.
    pub fn next_hops(&self) -> impl Iterator<Item = StationId> + '_ {
        self.packets.keys().copied()
    }

    /// Recompute the cached aggregates from the packets.
    pub fn invalidate_cache(&mut self) {
        self.cache = CargoCache::rebuild(self.packets.values().flatten());
        self.reserved_amounts = self
            .reserved
            .iter()
            .map(|(vehicle, queue)| (*vehicle, queue.iter().map(CargoPacket::count).sum()))
            .collect();
        self.reserved_count = self.reserved_amounts.values().sum();
    }

    /// Edit waiting and reserved packets in place. Emptied packets are
    /// dropped and the cache is rebuilt afterwards. Packets are re-keyed by
    /// their (unchanged) next hop.
    pub fn modify_packets<F>(&mut self, mut edit: F)
    where
        F: FnMut(&mut CargoPacket),
    {
        for queue in self.packets.values_mut().chain(self.reserved.values_mut()) {
            queue.iter_mut().for_each(&mut edit);
            queue.retain(|p| !p.is_empty());
        }
        self.packets.retain(|_, queue| !queue.is_empty());
        self.reserved.retain(|_, queue| !queue.is_empty());
        self.invalidate_cache();
    }

    /// Queue a packet for `next`, merging it into a compatible one waiting
    /// for the same hop where possible.
    ///
    /// # Panics
    ///
    /// Panics if the packet is empty.
    pub fn append(&mut self, next: StationId, mut packet: CargoPacket) {
        assert!(!packet.is_empty(), "cannot append an empty cargo packet");
        packet.set_next(next);
        self.cache.add(&packet);
        merge_or_push(self.packets.entry(next).or_default(), packet);
    }

    /// Take at most `max` units from the front of the `next` queue.
    fn take(&mut self, next: StationId, max: u32) -> Option<CargoPacket> {
        let queue = self.packets.get_mut(&next)?;
        let packet = queue.pop_front()?;
        let (piece, rest) = split_front(packet, max);
        if let Some(rest) = rest {
            queue.push_front(rest);
        }
        if queue.is_empty() {
            self.packets.remove(&next);
        }
        self.cache.remove(&piece);
        Some(piece)
    }

    /// Hops a vehicle heading to `next` can load: cargo for `next` first,
    /// then cargo for any hop. A vehicle whose next stop is not known can
    /// take everything, queue by queue in key order.
    fn loadable_hops(&self, next: StationId) -> Vec<StationId> {
        if next.is_valid() {
            vec![next, StationId::INVALID]
        } else {
            self.packets.keys().copied().collect()
        }
    }

    /// Reserve up to `max_move` waiting units for `vehicle`, which heads to
    /// `next`. The boundary packet is split. Returns the amount reserved.
    pub fn reserve(&mut self, vehicle: VehicleId, max_move: u32, next: StationId) -> u32 {
        let mut moved = 0;
        for hop in self.loadable_hops(next) {
            while moved < max_move {
                let Some(piece) = self.take(hop, max_move - moved) else { break };
                moved += piece.count();
                self.reserved.entry(vehicle).or_default().push_back(piece);
            }
        }
        if moved > 0 {
            *self.reserved_amounts.entry(vehicle).or_insert(0) += moved;
            self.reserved_count += moved;
        }
        moved
    }

    /// Load up to `max_move` units previously reserved for `vehicle` into
    /// `dest`. Whatever does not fit stays reserved. Returns the amount loaded.
    pub fn load_reserved(
        &mut self,
        vehicle: VehicleId,
        dest: &mut VehicleCargoList,
        max_move: u32,
        load_place: Tile,
    ) -> u32 {
        let Some(queue) = self.reserved.get_mut(&vehicle) else {
            return 0;
        };
        let mut moved = 0;
        while moved < max_move {
            let Some(packet) = queue.pop_front() else { break };
            let (mut piece, rest) = split_front(packet, max_move - moved);
            if let Some(rest) = rest {
                queue.push_front(rest);
            }
            moved += piece.count();
            piece.set_loaded_at(load_place);
            dest.append(piece);
        }
        if queue.is_empty() {
            self.reserved.remove(&vehicle);
        }
        if let Some(amount) = self.reserved_amounts.get_mut(&vehicle) {
            *amount -= moved;
            if *amount == 0 {
                self.reserved_amounts.remove(&vehicle);
            }
        }
        self.reserved_count -= moved;
        moved
    }

    /// Return everything reserved for `vehicle` to the waiting set.
    pub fn unreserve(&mut self, vehicle: VehicleId) -> u32 {
        let Some(queue) = self.reserved.remove(&vehicle) else {
            return 0;
        };
        let amount = self.reserved_amounts.remove(&vehicle).unwrap_or(0);
        self.reserved_count -= amount;
        for packet in queue {
            self.append(packet.next(), packet);
        }
        amount
    }

    /// Load up to `max_move` waiting units directly into `dest`, which heads
    /// to `next`. Returns the amount loaded.
    pub fn load(&mut self, dest: &mut VehicleCargoList, max_move: u32, next: StationId, load_place: Tile) -> u32 {
        let mut moved = 0;
        for hop in self.loadable_hops(next) {
            while moved < max_move {
                let Some(mut piece) = self.take(hop, max_move - moved) else { break };
                moved += piece.count();
                piece.set_loaded_at(load_place);
                dest.append(piece);
            }
        }
        moved
    }

    /// Drop waiting cargo until at most `max_remaining` units are left.
    /// Cargo for the highest next hop goes first. Returns the amount dropped.
    pub fn truncate(&mut self, max_remaining: u32) -> u32 {
        let mut excess = self.count().saturating_sub(max_remaining);
        let dropped = excess;
        while excess > 0 {
            let Some(mut entry) = self.packets.last_entry() else { break };
            let queue = entry.get_mut();
            let Some(mut packet) = queue.pop_back() else {
                entry.remove();
                continue;
            };
            if packet.count() > excess {
                let front = packet.split(packet.count() - excess);
                self.cache.remove(&packet);
                queue.push_back(front);
                excess = 0;
            } else {
                excess -= packet.count();
                self.cache.remove(&packet);
                if queue.is_empty() {
                    entry.remove();
                }
            }
        }
        dropped
    }

    /// Re-key cargo waiting for `avoid` to the current plan of its origin,
    /// or to "any hop" if the plan also leads via `avoid`.
    pub fn reroute(&mut self, avoid: StationId, flows: &FlowStatMap) -> u32 {
        let Some(queue) = self.packets.remove(&avoid) else {
            return 0;
        };
        let mut moved = 0;
        for packet in queue {
            self.cache.remove(&packet);
            let via = flows
                .get(&packet.source())
                .and_then(|stats| stats.iter().map(|s| s.via()).find(|via| *via != avoid))
                .unwrap_or(StationId::INVALID);
            moved += packet.count();
            self.append(via, packet);
        }
        moved
    }

    /// Forget a removed origin station on all packets here.
    pub fn invalidate_station(&mut self, station: StationId) {
        self.modify_packets(|p| p.invalidate_station(station));
    }

    /// Forget a removed producer on all packets here.
    pub fn invalidate_source(&mut self, source_type: SourceType, source_id: SourceId) {
        self.modify_packets(|p| p.invalidate_source(source_type, source_id));
    }
}
