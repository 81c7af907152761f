//! Light bookkeeping: the static light registry with per-light reach sets,
//! and the fixed pool of dynamic light slots.

use hashbrown::HashMap;
use umbra_geom::{Rgb, Vec3};
use umbra_level::Level;
use umbra_vis::{LightCone, MIN_LIGHT_RADIUS, VisSet, flood_visibility};

/// World-authored light, persisting across frames. `reach` is the set of
/// subsectors the light can spill into; it scopes invalidation when the
/// light changes.
pub struct StaticLight {
    pub origin: Vec3,
    pub radius: f32,
    pub color: Rgb,
    pub owner: u64,
    pub leaf: usize,
    pub active: bool,
    pub reach: VisSet,
}

/// Id-keyed static lights with incremental add/move/remove.
#[derive(Default)]
pub struct StaticLights {
    lights: Vec<StaticLight>,
    by_owner: HashMap<u64, usize>,
}

impl StaticLights {
    pub fn new() -> StaticLights {
        StaticLights::default()
    }

    pub fn len(&self) -> usize {
        self.lights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lights.is_empty()
    }

    /// Insert or replace the light owned by `owner`.
    pub fn add(
        &mut self,
        level: &Level,
        owner: u64,
        origin: Vec3,
        radius: f32,
        color: Rgb,
    ) -> &StaticLight {
        let mut reach = VisSet::new(level.subsectors.len());
        flood_visibility(level, origin, radius, &mut reach);
        let light = StaticLight {
            origin,
            radius,
            color,
            owner,
            leaf: level.point_in_subsector(origin),
            active: true,
            reach,
        };
        match self.by_owner.get(&owner) {
            Some(&i) => {
                self.lights[i] = light;
                &self.lights[i]
            }
            None => {
                self.lights.push(light);
                let i = self.lights.len() - 1;
                self.by_owner.insert(owner, i);
                &self.lights[i]
            }
        }
    }

    pub fn remove(&mut self, owner: u64) -> Option<StaticLight> {
        let i = self.by_owner.remove(&owner)?;
        let light = self.lights.swap_remove(i);
        if let Some(moved) = self.lights.get(i) {
            self.by_owner.insert(moved.owner, i);
        }
        Some(light)
    }

    pub fn get(&self, owner: u64) -> Option<&StaticLight> {
        self.by_owner.get(&owner).map(|&i| &self.lights[i])
    }

    pub fn iter_active(&self) -> impl Iterator<Item = &StaticLight> {
        self.lights.iter().filter(|l| l.active)
    }

    /// Deactivate lights crowding an earlier active light. Returns how many
    /// were dropped.
    pub fn refilter(&mut self, coeff: f32) -> usize {
        let coeff = coeff.clamp(0.1, 1.0);
        let mut dropped = 0usize;
        for i in 0..self.lights.len() {
            if !self.lights[i].active {
                continue;
            }
            for j in 0..i {
                if !self.lights[j].active {
                    continue;
                }
                let limit = coeff * self.lights[i].radius.min(self.lights[j].radius);
                let dsq = (self.lights[i].origin - self.lights[j].origin).length_squared();
                if dsq < limit * limit {
                    self.lights[i].active = false;
                    dropped += 1;
                    break;
                }
            }
        }
        if dropped > 0 {
            log::debug!("static light refilter dropped {dropped} lights");
        }
        dropped
    }
}

pub const MAX_DYN_LIGHTS: usize = 32;

/// One dynamic light slot; dead when the radius shrinks away or `die`
/// passes.
#[derive(Clone, Copy, Debug, Default)]
pub struct DynLight {
    pub origin: Vec3,
    pub radius: f32,
    pub color: Rgb,
    /// Absolute time after which the light is gone.
    pub die: f32,
    /// Radius shrink per second.
    pub decay: f32,
    pub owner: Option<u64>,
    pub cone: Option<LightCone>,
}

impl DynLight {
    #[inline]
    pub fn is_live(&self, time: f32) -> bool {
        self.radius >= MIN_LIGHT_RADIUS && self.die > time
    }
}

/// Fixed pool of dynamic lights, fully recomputed every frame. Slot
/// allocation replaces dead, crowded or far-away lights.
pub struct DynLights {
    slots: Vec<DynLight>,
    owners: HashMap<u64, usize>,
    time: f32,
}

impl DynLights {
    pub fn new(max_lights: usize) -> DynLights {
        let n = max_lights.clamp(1, MAX_DYN_LIGHTS);
        DynLights {
            slots: vec![DynLight::default(); n],
            owners: HashMap::new(),
            time: 0.0,
        }
    }

    #[inline]
    pub fn time(&self) -> f32 {
        self.time
    }

    fn clear_slot(&mut self, i: usize) {
        if let Some(owner) = self.slots[i].owner.take() {
            self.owners.remove(&owner);
        }
        self.slots[i] = DynLight::default();
    }

    /// Age all lights: radius decay plus expiry.
    pub fn decay(&mut self, dt: f32) {
        self.time += dt;
        for i in 0..self.slots.len() {
            let l = &mut self.slots[i];
            if l.radius <= 0.0 {
                continue;
            }
            l.radius -= dt * l.decay;
            if !self.slots[i].is_live(self.time) {
                self.clear_slot(i);
            }
        }
    }

    pub fn remove_owned(&mut self, owner: u64) {
        if let Some(&i) = self.owners.get(&owner) {
            self.clear_slot(i);
        }
    }

    /// Claim a slot. Owned lights reuse their slot; otherwise a dead slot,
    /// then a near-coincident smaller light, then the light farthest from
    /// the view gets replaced. A weaker duplicate of an existing nearby
    /// light is dropped instead.
    pub fn alloc(
        &mut self,
        owner: Option<u64>,
        origin: Vec3,
        radius: f32,
        color: Rgb,
        view_origin: Vec3,
    ) -> Option<&mut DynLight> {
        if radius < MIN_LIGHT_RADIUS {
            return None;
        }

        let mut slot = owner.and_then(|o| self.owners.get(&o).copied());
        if slot.is_none() {
            let mut dying: Option<usize> = None;
            let mut replace: Option<usize> = None;
            let mut farthest: Option<usize> = None;
            let mut best_dist = (origin - view_origin).length_squared();
            for i in 0..self.slots.len() {
                if !self.slots[i].is_live(self.time) {
                    dying.get_or_insert(i);
                    continue;
                }
                let dsq = (self.slots[i].origin - origin).length_squared();
                if dsq <= 36.0 {
                    // an equal or stronger light already burns here
                    if self.slots[i].radius >= radius {
                        return None;
                    }
                    replace = Some(i);
                    break;
                }
                let vd = (self.slots[i].origin - view_origin).length_squared();
                if vd > best_dist {
                    best_dist = vd;
                    farthest = Some(i);
                }
            }
            slot = replace.or(dying).or(farthest);
        }

        let i = slot?;
        self.clear_slot(i);
        self.slots[i] = DynLight {
            origin,
            radius,
            color,
            die: f32::INFINITY,
            decay: 0.0,
            owner,
            cone: None,
        };
        if let Some(o) = owner {
            self.owners.insert(o, i);
        }
        Some(&mut self.slots[i])
    }

    /// Live lights with their slot index (the dlight bit position).
    pub fn iter_live(&self) -> impl Iterator<Item = (usize, &DynLight)> {
        let time = self.time;
        self.slots
            .iter()
            .enumerate()
            .filter(move |(_, l)| l.is_live(time))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use umbra_level::{MapAssembler, RoomDef};

    fn one_room() -> Level {
        let mut asm = MapAssembler::new();
        asm.add_room(RoomDef::new(0.0, 0.0, 128.0, 128.0, 0.0, 128.0));
        asm.build().expect("room")
    }

    #[test]
    fn static_lights_are_owner_keyed() {
        let level = one_room();
        let mut lights = StaticLights::new();
        lights.add(&level, 7, Vec3::new(32.0, 32.0, 32.0), 100.0, Rgb::WHITE);
        lights.add(&level, 9, Vec3::new(96.0, 96.0, 32.0), 100.0, Rgb::WHITE);
        assert_eq!(lights.len(), 2);
        // re-adding the same owner replaces, not duplicates
        lights.add(&level, 7, Vec3::new(64.0, 64.0, 32.0), 50.0, Rgb::WHITE);
        assert_eq!(lights.len(), 2);
        assert_eq!(lights.get(7).map(|l| l.radius), Some(50.0));
        assert!(lights.remove(7).is_some());
        assert!(lights.get(7).is_none());
        assert!(lights.get(9).is_some());
    }

    #[test]
    fn refilter_drops_crowded_lights() {
        let level = one_room();
        let mut lights = StaticLights::new();
        lights.add(&level, 1, Vec3::new(64.0, 64.0, 32.0), 100.0, Rgb::WHITE);
        lights.add(&level, 2, Vec3::new(65.0, 64.0, 32.0), 100.0, Rgb::WHITE);
        lights.add(&level, 3, Vec3::new(100.0, 100.0, 32.0), 100.0, Rgb::WHITE);
        assert_eq!(lights.refilter(0.2), 1);
        assert_eq!(lights.iter_active().count(), 2);
    }

    #[test]
    fn dyn_slots_replace_weaker_coincident_lights() {
        let mut dl = DynLights::new(4);
        let view = Vec3::ZERO;
        dl.alloc(None, Vec3::new(10.0, 0.0, 0.0), 64.0, Rgb::WHITE, view)
            .expect("first");
        // weaker duplicate on top of it is dropped
        assert!(
            dl.alloc(None, Vec3::new(11.0, 0.0, 0.0), 32.0, Rgb::WHITE, view)
                .is_none()
        );
        // stronger duplicate replaces in place
        dl.alloc(None, Vec3::new(11.0, 0.0, 0.0), 128.0, Rgb::WHITE, view)
            .expect("replacement");
        assert_eq!(dl.iter_live().count(), 1);
        assert_eq!(dl.iter_live().next().map(|(_, l)| l.radius), Some(128.0));
    }

    #[test]
    fn dyn_lights_decay_and_expire() {
        let mut dl = DynLights::new(4);
        let l = dl
            .alloc(Some(42), Vec3::ZERO, 64.0, Rgb::WHITE, Vec3::ZERO)
            .expect("slot");
        l.decay = 32.0;
        dl.decay(1.0);
        assert_eq!(dl.iter_live().next().map(|(_, l)| l.radius), Some(32.0));
        dl.decay(1.0);
        assert_eq!(dl.iter_live().count(), 0);
        // the owner key is released with the slot
        dl.alloc(Some(42), Vec3::ZERO, 16.0, Rgb::WHITE, Vec3::ZERO)
            .expect("reuse after expiry");
    }
}
