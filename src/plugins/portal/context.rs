//! The explicit engine context: registries, links and the physics tick phases.

use bevy::{prelude::*, utils::HashMap};

use super::{
    config::{PortalSettings, MAX_RECURSION_LIMIT},
    contact::{ContactRouting, SharedRouting},
    ghost::{GhostData, GhostKey, GhostPool, GhostRole, GhostSlot, SweepStats},
    portal::{LinkError, NotWorkable, PartnerFault, Portal, PortalState},
    proxy::{ProxyKind, ProxyShape},
    transfer::TransferTransform,
    traveler::{
        pass_through, BodyState, PortalTransferEvent, SliceContribution, TransferPhase, Traveler,
        TravelerState,
    },
};

/// A collision proxy registered with the engine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProxyState {
    pub shape: ProxyShape,
    pub kind: ProxyKind,
    /// Non-static rigid body the proxy is attached to.
    pub body: Option<Entity>,
    /// Pose relative to `body`, or the world pose when there is no body.
    pub local: Transform,
    /// World pose, kept in sync with `body`.
    pub transform: Transform,
}

impl ProxyState {
    pub fn attached(shape: ProxyShape, body: Entity, local: Transform, body_transform: &Transform) -> ProxyState {
        ProxyState {
            shape,
            kind: ProxyKind::Real,
            body: Some(body),
            local,
            transform: body_transform.mul_transform(local),
        }
    }

    pub fn fixed(shape: ProxyShape, kind: ProxyKind, transform: Transform) -> ProxyState {
        ProxyState {
            shape,
            kind,
            body: None,
            local: transform,
            transform,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub transfers: usize,
    pub penetrating_travelers: usize,
    pub active_ghosts: usize,
    pub sweep: SweepStats,
}

#[derive(Debug, Resource)]
/// Owns every registry of the portal engine. Bevy systems copy ECS state in, run the tick phases
/// and apply the results back.
pub struct PortalContext {
    portals: HashMap<Entity, PortalState>,
    travelers: HashMap<Entity, TravelerState>,
    bodies: HashMap<Entity, BodyState>,
    proxies: HashMap<Entity, ProxyState>,
    ghosts: GhostPool,
    routing: SharedRouting,
    settings: PortalSettings,
    coordinator: Option<Entity>,
    events: Vec<PortalTransferEvent>,
    tick: u64,
    elapsed_secs: f32,
}

impl Default for PortalContext {
    fn default() -> Self {
        PortalContext::new(PortalSettings::default())
    }
}

impl PortalContext {
    pub fn new(mut settings: PortalSettings) -> PortalContext {
        settings.recursion_limit = settings.recursion_limit.min(MAX_RECURSION_LIMIT);
        PortalContext {
            portals: HashMap::default(),
            travelers: HashMap::default(),
            bodies: HashMap::default(),
            proxies: HashMap::default(),
            ghosts: GhostPool::new(settings.max_ghosts),
            routing: SharedRouting::default(),
            settings,
            coordinator: None,
            events: Vec::new(),
            tick: 0,
            elapsed_secs: 0.,
        }
    }

    pub fn settings(&self) -> &PortalSettings {
        &self.settings
    }

    /// Replace the settings. The recursion limit is capped to [`MAX_RECURSION_LIMIT`].
    pub fn set_settings(&mut self, mut settings: PortalSettings) {
        settings.recursion_limit = settings.recursion_limit.min(MAX_RECURSION_LIMIT);
        self.ghosts.set_capacity(settings.max_ghosts);
        self.settings = settings;
    }

    pub fn routing(&self) -> &SharedRouting {
        &self.routing
    }

    pub fn ghosts(&self) -> &GhostPool {
        &self.ghosts
    }

    pub fn ghosts_mut(&mut self) -> &mut GhostPool {
        &mut self.ghosts
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    // Coordinator

    /// Claim the coordinator role. The first claimant keeps it until released.
    pub fn claim_coordinator(&mut self, entity: Entity) -> bool {
        match self.coordinator {
            None => {
                info!("Portal orchestrator {:?} is now active", entity);
                self.coordinator = Some(entity);
                true
            }
            Some(current) => current == entity,
        }
    }

    pub fn release_coordinator(&mut self, entity: Entity) {
        if self.coordinator == Some(entity) {
            info!("Portal orchestrator {:?} released", entity);
            self.coordinator = None;
        }
    }

    pub fn coordinator(&self) -> Option<Entity> {
        self.coordinator
    }

    // Portal registry

    pub fn register_portal(&mut self, entity: Entity, portal: &Portal, transform: Transform) {
        match self.portals.get_mut(&entity) {
            Some(state) => {
                state.config = portal.config.clone();
                state.overrides = portal.overrides.clone();
                state.transform = transform;
                if state.enabled != portal.enabled {
                    self.set_portal_enabled(entity, portal.enabled);
                }
            }
            None => {
                info!("Registering portal {:?}", entity);
                self.portals.insert(entity, PortalState::new(portal, transform));
            }
        }
    }

    /// Enabling registers the portal with the active set, disabling removes it. Links survive.
    pub fn set_portal_enabled(&mut self, entity: Entity, enabled: bool) {
        if let Some(state) = self.portals.get_mut(&entity) {
            if state.enabled != enabled {
                info!(
                    "Portal {:?} {}",
                    entity,
                    if enabled { "enabled" } else { "disabled" }
                );
                state.enabled = enabled;
                state.clear_detection();
            }
        }
    }

    pub fn set_portal_transform(&mut self, entity: Entity, transform: Transform) {
        if let Some(state) = self.portals.get_mut(&entity) {
            state.transform = transform;
        }
    }

    pub fn remove_portal(&mut self, entity: Entity) {
        if let Some(state) = self.portals.remove(&entity) {
            info!("Deregistering portal {:?}", entity);
            if let Some(partner) = state.linked.and_then(|linked| self.portals.get_mut(&linked)) {
                if partner.linked == Some(entity) {
                    partner.linked = None;
                }
            }
            for traveler in self.travelers.values_mut() {
                traveler.candidate_portals.remove(&entity);
                if traveler.penetrating_portal == Some(entity) {
                    traveler.penetrating_portal = None;
                }
            }
        }
    }

    pub fn portal(&self, entity: Entity) -> Option<&PortalState> {
        self.portals.get(&entity)
    }

    pub fn portals(&self) -> impl Iterator<Item = (Entity, &PortalState)> {
        self.portals.iter().map(|(entity, state)| (*entity, state))
    }

    /// Portals that are enabled and workable, in a stable order.
    pub fn workable_portals(&self) -> Vec<Entity> {
        let mut portals: Vec<Entity> = self
            .portals
            .keys()
            .copied()
            .filter(|portal| self.is_workable(*portal))
            .collect();
        portals.sort();
        portals
    }

    // Linking

    fn unlink(&mut self, entity: Entity) {
        let previous = self.portals.get_mut(&entity).and_then(|state| state.linked.take());
        if let Some(previous) = previous {
            if let Some(partner) = self.portals.get_mut(&previous) {
                if partner.linked == Some(entity) {
                    partner.linked = None;
                }
            }
            info!("Portal {:?} unlinked from {:?}", entity, previous);
        }
    }

    /// Link `entity` with `other`, or unlink it with `None`. Links are symmetric and exclusive.
    pub fn try_link_portal(&mut self, entity: Entity, other: Option<Entity>) -> Result<(), LinkError> {
        if !self.portals.contains_key(&entity) {
            return Err(LinkError::UnknownPortal(entity));
        }
        let other = match other {
            None => {
                self.unlink(entity);
                return Ok(());
            }
            Some(other) => other,
        };
        let this = self.portals.get(&entity).ok_or(LinkError::UnknownPortal(entity))?;
        if other == entity {
            return Err(LinkError::SelfLink);
        }
        let that = self.portals.get(&other).ok_or(LinkError::UnknownPortal(other))?;
        if this.config.is_none() {
            return Err(LinkError::MissingConfig(entity));
        }
        if that.config.is_none() {
            return Err(LinkError::MissingConfig(other));
        }
        if !this.shares_config(that) {
            return Err(LinkError::ConfigMismatch);
        }
        if this.linked == Some(other) && that.linked == Some(entity) {
            return Ok(());
        }

        self.unlink(entity);
        self.unlink(other);
        if let Some(state) = self.portals.get_mut(&entity) {
            state.linked = Some(other);
        }
        if let Some(state) = self.portals.get_mut(&other) {
            state.linked = Some(entity);
        }
        info!("Portals {:?} and {:?} linked", entity, other);
        Ok(())
    }

    /// Like [`PortalContext::try_link_portal`], logging failures.
    pub fn link_portal(&mut self, entity: Entity, other: Option<Entity>) -> bool {
        match self.try_link_portal(entity, other) {
            Ok(()) => true,
            Err(err) => {
                warn!("Cannot link portal {:?}: {}", entity, err);
                false
            }
        }
    }

    pub fn linked_portal(&self, entity: Entity) -> Option<Entity> {
        self.portals.get(&entity).and_then(PortalState::linked_portal)
    }

    /// Check the portal and demote an inconsistent link back to unlinked.
    pub fn validate(&mut self, entity: Entity) -> Result<Entity, NotWorkable> {
        let state = self.portals.get(&entity).ok_or(NotWorkable::UnknownPortal)?;
        if let Some(linked) = state.linked {
            let consistent = linked != entity
                && self.portals.get(&linked).map_or(false, |partner| {
                    partner.linked == Some(entity) && partner.shares_config(state)
                });
            if !consistent {
                warn!("Portal {:?} had an inconsistent link to {:?}, unlinking", entity, linked);
                if let Some(state) = self.portals.get_mut(&entity) {
                    state.linked = None;
                    state.clear_detection();
                }
            }
        }
        let result = self.workability(entity);
        if let Err(reason) = result {
            debug!("Portal {:?} is not workable: {}", entity, reason);
        }
        result
    }

    /// The linked partner when the pair is fully usable.
    pub fn workability(&self, entity: Entity) -> Result<Entity, NotWorkable> {
        let state = self.portals.get(&entity).ok_or(NotWorkable::UnknownPortal)?;
        if let Some(fault) = state.local_fault() {
            return Err(fault);
        }
        let linked = state.linked.ok_or(NotWorkable::Unlinked)?;
        if linked == entity {
            return Err(NotWorkable::SelfLinked);
        }
        let partner = self
            .portals
            .get(&linked)
            .ok_or(NotWorkable::Partner(PartnerFault::Missing))?;
        if partner.linked != Some(entity) {
            return Err(NotWorkable::OneSidedLink);
        }
        if !state.shares_config(partner) {
            return Err(NotWorkable::ConfigMismatch);
        }
        match partner.local_fault() {
            None => Ok(linked),
            Some(NotWorkable::Disabled) => Err(NotWorkable::Partner(PartnerFault::Disabled)),
            Some(NotWorkable::BadScale) => Err(NotWorkable::Partner(PartnerFault::BadScale)),
            Some(other) => Err(other),
        }
    }

    pub fn is_workable(&self, entity: Entity) -> bool {
        self.workability(entity).is_ok()
    }

    /// Transfer from `entity` to its partner, `None` when the pair isn't workable.
    pub fn transfer(&self, entity: Entity) -> Option<TransferTransform> {
        let linked = self.workability(entity).ok()?;
        let from = self.portals.get(&entity)?;
        let to = self.portals.get(&linked)?;
        Some(TransferTransform::between(&from.transform, &to.transform))
    }

    pub fn transfer_or_identity(&self, entity: Entity) -> TransferTransform {
        self.transfer(entity).unwrap_or(TransferTransform::IDENTITY)
    }

    pub fn get_transfer_matrix(&self, entity: Entity) -> Mat4 {
        self.transfer_or_identity(entity).matrix()
    }

    pub fn transfer_point(&self, entity: Entity, point: Vec3) -> Vec3 {
        self.transfer_or_identity(entity).transfer_point(point)
    }

    pub fn transfer_vector(&self, entity: Entity, vector: Vec3) -> Vec3 {
        self.transfer_or_identity(entity).transfer_vector(vector)
    }

    pub fn transfer_direction(&self, entity: Entity, direction: Vec3) -> Vec3 {
        self.transfer_or_identity(entity).transfer_direction(direction)
    }

    pub fn transfer_rotation(&self, entity: Entity, rotation: Quat) -> Quat {
        self.transfer_or_identity(entity).transfer_rotation(rotation)
    }

    // Travelers, bodies and proxies

    pub fn register_traveler(&mut self, entity: Entity, traveler: &Traveler) {
        match self.travelers.get_mut(&entity) {
            Some(state) => {
                state.pivot_offset = traveler.pivot_offset;
                state.clone_layer = traveler.clone_layer;
                state.renderers = traveler.renderers.clone();
                state.keep_upright = traveler.keep_upright;
            }
            None => {
                debug!("Registering traveler {:?}", entity);
                self.travelers.insert(entity, TravelerState::new(traveler));
            }
        }
    }

    pub fn remove_traveler(&mut self, entity: Entity) {
        if self.travelers.remove(&entity).is_some() {
            debug!("Deregistering traveler {:?}", entity);
        }
    }

    pub fn traveler(&self, entity: Entity) -> Option<&TravelerState> {
        self.travelers.get(&entity)
    }

    pub fn travelers(&self) -> impl Iterator<Item = (Entity, &TravelerState)> {
        self.travelers.iter().map(|(entity, state)| (*entity, state))
    }

    pub fn set_body(&mut self, entity: Entity, body: BodyState) {
        self.bodies.insert(entity, body);
    }

    pub fn remove_body(&mut self, entity: Entity) {
        self.bodies.remove(&entity);
    }

    pub fn body(&self, entity: Entity) -> Option<&BodyState> {
        self.bodies.get(&entity)
    }

    pub fn set_proxy(&mut self, entity: Entity, proxy: ProxyState) {
        self.proxies.insert(entity, proxy);
    }

    pub fn remove_proxy(&mut self, entity: Entity) {
        self.proxies.remove(&entity);
    }

    pub fn proxy(&self, entity: Entity) -> Option<&ProxyState> {
        self.proxies.get(&entity)
    }

    /// Collision proxies attached to the body of `traveler`.
    pub fn traveler_proxies(&self, traveler: Entity) -> Vec<Entity> {
        let mut proxies: Vec<Entity> = self
            .proxies
            .iter()
            .filter(|(_, proxy)| proxy.kind.is_real() && proxy.body == Some(traveler))
            .map(|(entity, _)| *entity)
            .collect();
        proxies.sort();
        proxies
    }

    /// Transfer notifications produced since the last call, in emission order.
    pub fn drain_events(&mut self) -> Vec<PortalTransferEvent> {
        std::mem::take(&mut self.events)
    }

    // Physics tick

    /// Run one fixed physics tick. `allocate` provides entities for newly created ghosts.
    pub fn physics_tick<F: FnMut() -> Entity>(&mut self, dt: f32, allocate: &mut F) -> TickReport {
        self.tick += 1;
        self.elapsed_secs += dt;

        let transfers = self.resolve_travelers();
        self.sync_proxy_transforms();
        self.update_detection();
        let penetrating_travelers = self.update_candidates();
        self.sync_proxy_transforms();
        self.refresh_ghosts(allocate);
        self.rebuild_routing();
        let sweep = self
            .ghosts
            .sweep(self.tick, self.elapsed_secs, self.settings.ghost_expiration_secs);
        if sweep.released > 0 {
            debug!("Released {} idle ghost proxies", sweep.released);
        }

        TickReport {
            transfers,
            penetrating_travelers,
            active_ghosts: self.ghosts.iter_active().count(),
            sweep,
        }
    }

    fn sorted_travelers(&self) -> Vec<Entity> {
        let mut travelers: Vec<Entity> = self.travelers.keys().copied().collect();
        travelers.sort();
        travelers
    }

    /// Resolve pass: teleport every traveler whose pivot crossed a portal since the last tick.
    pub fn resolve_travelers(&mut self) -> usize {
        self.sorted_travelers()
            .into_iter()
            .filter(|traveler| self.resolve_traveler(*traveler))
            .count()
    }

    fn resolve_traveler(&mut self, entity: Entity) -> bool {
        let (traveler, body) = match (self.travelers.get(&entity), self.bodies.get(&entity)) {
            (Some(traveler), Some(body)) => (traveler, body),
            _ => return false,
        };
        let pivot = traveler.pivot(&body.transform);

        let through_penetrating = traveler.penetrating_portal.filter(|portal| {
            self.is_workable(*portal)
                && self
                    .portals
                    .get(portal)
                    .map_or(false, |state| state.signed_distance(pivot) < 0.)
        });
        let crossing = through_penetrating.or_else(|| {
            let last = traveler.last_pivot.filter(|last| *last != pivot)?;
            traveler
                .candidate_portals
                .iter()
                .filter(|(portal, _)| self.is_workable(**portal))
                .filter(|(portal, _)| {
                    self.portals
                        .get(*portal)
                        .and_then(|state| state.segment_hits_opening(last, pivot))
                        .is_some()
                })
                .min_by(|(_, a), (_, b)| a.total_cmp(b))
                .map(|(portal, _)| *portal)
        });

        match crossing {
            Some(portal) => self.transfer_traveler(entity, portal),
            None => {
                if let Some(traveler) = self.travelers.get_mut(&entity) {
                    traveler.last_pivot = Some(pivot);
                }
                false
            }
        }
    }

    fn transfer_traveler(&mut self, entity: Entity, from: Entity) -> bool {
        let (transfer, to) = match (self.transfer(from), self.linked_portal(from)) {
            (Some(transfer), Some(to)) => (transfer, to),
            _ => return false,
        };
        let (traveler, body) = match (self.travelers.get_mut(&entity), self.bodies.get_mut(&entity)) {
            (Some(traveler), Some(body)) => (traveler, body),
            _ => return false,
        };

        self.events.push(PortalTransferEvent {
            traveler: entity,
            from,
            to,
            phase: TransferPhase::Leaving,
        });
        pass_through(body, &transfer, traveler.keep_upright);
        self.events.push(PortalTransferEvent {
            traveler: entity,
            from,
            to,
            phase: TransferPhase::Arrived,
        });

        traveler.last_pivot = Some(traveler.pivot(&body.transform));
        traveler.penetrating_portal = None;
        traveler.candidate_portals.clear();
        info!("Traveler {:?} transferred from portal {:?} to {:?}", entity, from, to);
        true
    }

    /// Teleport a traveler so it emerges from `target`, bypassing detection.
    ///
    /// Returns `Ok(false)` when `traveler` isn't a registered traveler with a body.
    pub fn force_transfer(&mut self, traveler: Entity, target: Entity) -> Result<bool, NotWorkable> {
        let source = self.workability(target)?;
        let moved = self.transfer_traveler(traveler, source);
        if moved {
            self.sync_proxy_transforms();
        }
        Ok(moved)
    }

    /// Recompute the world pose of every proxy attached to a body.
    pub fn sync_proxy_transforms(&mut self) {
        for proxy in self.proxies.values_mut() {
            if let Some(body) = proxy.body.and_then(|body| self.bodies.get(&body)) {
                proxy.transform = body.transform.mul_transform(proxy.local);
            }
        }
    }

    /// Rebuild every portal's detection set from scratch.
    pub fn update_detection(&mut self) {
        for state in self.portals.values_mut() {
            state.clear_detection();
        }
        let budget = self.settings.max_overlaps_per_portal;
        for entity in self.workable_portals() {
            let state = match self.portals.get(&entity) {
                Some(state) => state,
                None => continue,
            };
            let mut overlaps: Vec<(f32, Entity)> = self
                .proxies
                .iter()
                .filter(|(_, proxy)| proxy.kind.is_real() && proxy.body.is_some())
                .filter(|(_, proxy)| state.overlaps_detection_zone(&proxy.shape, &proxy.transform))
                .map(|(collider, proxy)| {
                    (
                        proxy.transform.translation.distance(state.transform.translation),
                        *collider,
                    )
                })
                .collect();
            overlaps.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
            if overlaps.len() > budget {
                debug!(
                    "Portal {:?} overlaps {} proxies, keeping the nearest {}",
                    entity,
                    overlaps.len(),
                    budget
                );
                overlaps.truncate(budget);
            }
            if let Some(state) = self.portals.get_mut(&entity) {
                state.detection_zone_colliders = overlaps.into_iter().map(|(_, collider)| collider).collect();
            }
        }
    }

    /// Update-candidates pass. Returns how many travelers straddle a portal.
    pub fn update_candidates(&mut self) -> usize {
        let portals = self.workable_portals();
        let mut penetrating_count = 0;
        for entity in self.sorted_travelers() {
            let pivot = match (self.travelers.get(&entity), self.bodies.get(&entity)) {
                (Some(traveler), Some(body)) => traveler.pivot(&body.transform),
                _ => continue,
            };
            let own = self.traveler_proxies(entity);

            let mut candidates = HashMap::default();
            let mut nearest_penetrating: Option<(Entity, f32)> = None;
            for portal in &portals {
                let state = match self.portals.get(portal) {
                    Some(state) => state,
                    None => continue,
                };
                if state.signed_distance(pivot) < 0. {
                    continue;
                }
                let attached: Vec<(&ProxyState, f32)> = state
                    .detection_zone_colliders
                    .iter()
                    .filter(|collider| own.contains(collider))
                    .filter_map(|collider| self.proxies.get(collider))
                    .map(|proxy| {
                        (
                            proxy,
                            proxy.transform.translation.distance(state.transform.translation),
                        )
                    })
                    .collect();
                let closest = match attached.iter().map(|(_, d)| *d).min_by(f32::total_cmp) {
                    Some(closest) => closest,
                    None => continue,
                };
                candidates.insert(*portal, closest);

                let penetrating = attached
                    .iter()
                    .any(|(proxy, _)| state.is_penetrating(&proxy.shape, &proxy.transform));
                if penetrating && nearest_penetrating.map_or(true, |(_, d)| closest < d) {
                    nearest_penetrating = Some((*portal, closest));
                }
            }

            let penetrating_portal = nearest_penetrating.map(|(portal, _)| portal);
            if let Some(portal) = penetrating_portal {
                penetrating_count += 1;
                self.partition_penetrating(portal, &own);
            }
            if let Some(traveler) = self.travelers.get_mut(&entity) {
                traveler.candidate_portals = candidates;
                traveler.penetrating_portal = penetrating_portal;
            }
        }
        penetrating_count
    }

    /// Move the proxies of `own` that cross the plane of `portal` into its penetrating set.
    fn partition_penetrating(&mut self, portal: Entity, own: &[Entity]) {
        let proxies = &self.proxies;
        if let Some(state) = self.portals.get_mut(&portal) {
            let (crossing, approaching): (Vec<Entity>, Vec<Entity>) =
                state.detection_zone_colliders.iter().copied().partition(|collider| {
                    own.contains(collider)
                        && proxies
                            .get(collider)
                            .map_or(false, |proxy| state.is_penetrating(&proxy.shape, &proxy.transform))
                });
            state.detection_zone_colliders = approaching;
            state.penetrating_colliders.extend(crossing);
        }
    }

    /// Create or refresh the mirror proxies of every portal with tracked colliders.
    pub fn refresh_ghosts<F: FnMut() -> Entity>(&mut self, allocate: &mut F) {
        let tick = self.tick;
        let now = self.elapsed_secs;
        for portal in self.workable_portals() {
            let (transfer, linked) = match (self.transfer(portal), self.linked_portal(portal)) {
                (Some(transfer), Some(linked)) => (transfer, linked),
                _ => continue,
            };
            let (state, partner) = match (self.portals.get(&portal), self.portals.get(&linked)) {
                (Some(state), Some(partner)) => (state, partner),
                _ => continue,
            };

            let mut crossing_per_body: HashMap<Entity, usize> = HashMap::default();
            for collider in &state.penetrating_colliders {
                if let Some(body) = self.proxies.get(collider).and_then(|proxy| proxy.body) {
                    *crossing_per_body.entry(body).or_default() += 1;
                }
            }

            for collider in &state.penetrating_colliders {
                let proxy = match self.proxies.get(collider) {
                    Some(proxy) => proxy,
                    None => continue,
                };
                let mirror = proxy
                    .body
                    .and_then(|body| Some((body, self.bodies.get(&body)?.mirrored(&transfer))));
                let ghost_body = mirror.and_then(|(body, mirror)| {
                    self.ghosts.touch(
                        GhostKey {
                            source: body,
                            portal: linked,
                            role: GhostRole::Body,
                        },
                        GhostData::Body(mirror),
                        tick,
                        now,
                        allocate,
                    )
                });
                // The mirror body gets its mass from its colliders, split evenly.
                let mass = mirror.filter(|_| ghost_body.is_some()).map(|(body, mirror)| {
                    mirror.mass / crossing_per_body.get(&body).copied().unwrap_or(1).max(1) as f32
                });
                self.ghosts.touch(
                    GhostKey {
                        source: *collider,
                        portal: linked,
                        role: GhostRole::Collider,
                    },
                    GhostData::Collider {
                        shape: proxy.shape,
                        transform: transfer.transfer_transform(&proxy.transform),
                        kind: ProxyKind::Ghost {
                            source: *collider,
                            attached_portal: linked,
                        },
                        body: ghost_body,
                        local: proxy.local,
                        mass,
                    },
                    tick,
                    now,
                    allocate,
                );
            }

            if partner.penetrating_colliders.is_empty() {
                continue;
            }
            for collider in &state.detection_zone_colliders {
                let proxy = match self.proxies.get(collider) {
                    Some(proxy) => proxy,
                    None => continue,
                };
                let transform = transfer.transfer_transform(&proxy.transform);
                self.ghosts.touch(
                    GhostKey {
                        source: *collider,
                        portal: linked,
                        role: GhostRole::Obstacle,
                    },
                    GhostData::Collider {
                        shape: proxy.shape,
                        transform,
                        kind: ProxyKind::Obstacle {
                            source: *collider,
                            plane: linked,
                        },
                        body: None,
                        local: transform,
                        mass: None,
                    },
                    tick,
                    now,
                    allocate,
                );
            }
        }
    }

    /// Carry the velocity change the solver gave a mirror body back to the body it mirrors.
    ///
    /// Returns `false` when `ghost` is not an active mirror body or its source cannot respond.
    pub fn apply_ghost_response(&mut self, ghost: Entity, linvel: Vec3, angvel: Vec3) -> bool {
        let (key, mirror) = match self.ghosts.find_entity(ghost) {
            Some(GhostSlot {
                key,
                data: GhostData::Body(mirror),
                active: true,
                ..
            }) => (*key, *mirror),
            _ => return false,
        };
        if mirror.kinematic {
            return false;
        }
        let back = match self
            .linked_portal(key.portal)
            .and_then(|source_portal| self.transfer(source_portal))
        {
            Some(transfer) => transfer.inverse(),
            None => return false,
        };
        let linvel_delta = linvel - mirror.linvel;
        let angvel_delta = angvel - mirror.angvel;
        if linvel_delta.length_squared() <= f32::EPSILON && angvel_delta.length_squared() <= f32::EPSILON {
            return false;
        }
        match self.bodies.get_mut(&key.source) {
            Some(body) if !body.kinematic => {
                body.linvel += back.transfer_vector(linvel_delta);
                body.angvel += back.transfer_direction(angvel_delta);
                true
            }
            _ => false,
        }
    }

    /// Rebuild the contact-routing tables from this tick's detection sets and live ghosts.
    pub fn rebuild_routing(&mut self) {
        let mut routing = ContactRouting::default();
        for portal in self.workable_portals() {
            if let Some(state) = self.portals.get(&portal) {
                routing.add_plane(portal, state.get_plane(0.), state.linked);
                for collider in &state.penetrating_colliders {
                    routing.route_penetrating(*collider, portal);
                }
            }
        }
        for (collider, proxy) in &self.proxies {
            routing.add_kind(*collider, proxy.kind);
            if let Some(body) = proxy.body {
                routing.set_owner(*collider, body);
            }
        }
        for slot in self.ghosts.iter_active() {
            if let GhostData::Collider { kind, .. } = slot.data {
                routing.add_kind(slot.entity, kind);
                match kind {
                    ProxyKind::Ghost { attached_portal, .. } => {
                        routing.route_penetrating(slot.entity, attached_portal)
                    }
                    ProxyKind::Obstacle { plane, .. } => routing.route_obstacle(slot.entity, plane),
                    _ => {}
                }
            }
        }
        *self.routing.write() = routing;
    }

    /// `IsCollisionValid` over the current routing tables.
    pub fn is_collision_valid(&self, a: Entity, b: Entity, point: Vec3) -> bool {
        self.routing.read().is_collision_valid(a, b, point)
    }

    /// `IsRaycastHitValid` over the current routing tables.
    pub fn is_raycast_hit_valid(&self, collider: Entity, point: Vec3) -> bool {
        self.routing.read().is_raycast_hit_valid(collider, point)
    }

    // Render side

    /// Clip planes and clone pose for a traveler straddling a portal.
    pub fn slice_contribution(&self, traveler: Entity) -> Option<SliceContribution> {
        let state = self.travelers.get(&traveler)?;
        let portal = state.penetrating_portal?;
        let transfer = self.transfer(portal)?;
        let linked = self.linked_portal(portal)?;
        Some(SliceContribution {
            portal,
            original_plane: self.portals.get(&portal)?.get_plane(0.),
            clone_plane: self.portals.get(&linked)?.get_plane(0.),
            transfer,
            clone_layer: state.clone_layer,
        })
    }
}
