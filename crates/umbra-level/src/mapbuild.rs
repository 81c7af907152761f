//! Tiny axial map assembler: turns rectangular rooms into a valid BSP level.
//!
//! The real level builder is an offline tool; this covers tests, demos and
//! benchmarks with honest geometry (portals, one-sided walls, a proper node
//! tree) without depending on it.

use umbra_geom::{Aabb, Plane, Rgb, Vec3};

use crate::{BspChild, Level, LevelError, LevelParts, Node, Sector, Seg, Subsector};

/// Axis-aligned room; adjacent rooms sharing a boundary span get a portal.
#[derive(Clone, Copy, Debug)]
pub struct RoomDef {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
    pub floor: f32,
    pub ceil: f32,
    pub light_level: u8,
    pub light_color: Rgb,
}

impl RoomDef {
    pub fn new(x0: f32, y0: f32, x1: f32, y1: f32, floor: f32, ceil: f32) -> RoomDef {
        RoomDef {
            x0,
            y0,
            x1,
            y1,
            floor,
            ceil,
            light_level: 0,
            light_color: Rgb::WHITE,
        }
    }

    fn bounds(&self) -> Aabb {
        Aabb::new(
            Vec3::new(self.x0, self.y0, self.floor),
            Vec3::new(self.x1, self.y1, self.ceil),
        )
    }
}

#[derive(Default)]
pub struct MapAssembler {
    rooms: Vec<RoomDef>,
}

/// Which side of a room rectangle an edge lies on.
#[derive(Clone, Copy, PartialEq, Eq)]
enum EdgeSide {
    Bottom,
    Right,
    Top,
    Left,
}

impl MapAssembler {
    pub fn new() -> MapAssembler {
        MapAssembler::default()
    }

    pub fn add_room(&mut self, def: RoomDef) -> usize {
        self.rooms.push(def);
        self.rooms.len() - 1
    }

    /// Assemble sectors, segs, subsectors and a node tree.
    pub fn build(&self) -> Result<Level, LevelError> {
        if self.rooms.is_empty() {
            return Err(LevelError::Empty("rooms"));
        }

        let sectors: Vec<Sector> = self
            .rooms
            .iter()
            .map(|r| Sector {
                floor: Plane::new(Vec3::new(0.0, 0.0, 1.0), r.floor),
                ceiling: Plane::new(Vec3::new(0.0, 0.0, -1.0), -r.ceil),
                light_level: r.light_level,
                light_color: r.light_color,
            })
            .collect();

        let mut segs: Vec<Seg> = Vec::new();
        let mut subsectors: Vec<Subsector> = Vec::new();

        for (i, room) in self.rooms.iter().enumerate() {
            let first_seg = segs.len();
            for side in [EdgeSide::Bottom, EdgeSide::Right, EdgeSide::Top, EdgeSide::Left] {
                self.emit_edge(i, room, side, &mut segs);
            }
            subsectors.push(Subsector {
                sector: i,
                first_seg,
                seg_count: segs.len() - first_seg,
            });
        }

        link_partners(&mut segs);

        let mut order: Vec<usize> = (0..self.rooms.len()).collect();
        let mut nodes = Vec::new();
        let root = self.split_rooms(&mut order, &mut nodes)?;
        // Level::new expects the root to be the last node; split_rooms
        // already appends parents after children.
        debug_assert!(nodes.is_empty() || root == BspChild::Node(nodes.len() - 1));

        Level::new(LevelParts {
            sectors,
            segs,
            subsectors,
            nodes,
        })
    }

    /// Walk one room edge in interior-on-the-left order, alternating wall
    /// segs and portal segs where a neighbor shares the boundary.
    fn emit_edge(&self, i: usize, room: &RoomDef, side: EdgeSide, segs: &mut Vec<Seg>) {
        // edge as a 1-D span plus a map back into 2-D points
        let (lo, hi, reversed): (f32, f32, bool) = match side {
            EdgeSide::Bottom => (room.x0, room.x1, false),
            EdgeSide::Right => (room.y0, room.y1, false),
            EdgeSide::Top => (room.x0, room.x1, true),
            EdgeSide::Left => (room.y0, room.y1, true),
        };
        let to_point = |c: f32| -> Vec3 {
            match side {
                EdgeSide::Bottom => Vec3::new(c, room.y0, 0.0),
                EdgeSide::Top => Vec3::new(c, room.y1, 0.0),
                EdgeSide::Right => Vec3::new(room.x1, c, 0.0),
                EdgeSide::Left => Vec3::new(room.x0, c, 0.0),
            }
        };

        // collect neighbor spans on this edge
        let mut spans: Vec<(f32, f32, usize)> = Vec::new();
        for (j, other) in self.rooms.iter().enumerate() {
            if j == i {
                continue;
            }
            let touching = match side {
                EdgeSide::Bottom => other.y1 == room.y0,
                EdgeSide::Top => other.y0 == room.y1,
                EdgeSide::Right => other.x0 == room.x1,
                EdgeSide::Left => other.x1 == room.x0,
            };
            if !touching {
                continue;
            }
            let (olo, ohi) = match side {
                EdgeSide::Bottom | EdgeSide::Top => (other.x0, other.x1),
                EdgeSide::Right | EdgeSide::Left => (other.y0, other.y1),
            };
            let a = lo.max(olo);
            let b = hi.min(ohi);
            if b - a > 1e-3 {
                spans.push((a, b, j));
            }
        }
        spans.sort_by(|a, b| a.0.total_cmp(&b.0));

        // emit span list low-to-high, then reverse for top/left edges
        let mut pieces: Vec<(f32, f32, Option<usize>)> = Vec::new();
        let mut cursor = lo;
        for (a, b, j) in spans {
            if a - cursor > 1e-3 {
                pieces.push((cursor, a, None));
            }
            pieces.push((a, b, Some(j)));
            cursor = b;
        }
        if hi - cursor > 1e-3 {
            pieces.push((cursor, hi, None));
        }
        if reversed {
            pieces.reverse();
        }

        for (a, b, neighbor) in pieces {
            let (ca, cb) = if reversed { (b, a) } else { (a, b) };
            segs.push(Seg {
                v1: to_point(ca),
                v2: to_point(cb),
                plane: Plane::default(),
                front_subsector: i,
                partner: None,
                back_sector: neighbor,
                two_sided: neighbor.is_some(),
            });
        }
    }

    /// Recursive splitter over disjoint room rectangles; children are
    /// appended before their parent so the root lands last.
    fn split_rooms(
        &self,
        order: &mut [usize],
        nodes: &mut Vec<Node>,
    ) -> Result<BspChild, LevelError> {
        if order.len() == 1 {
            return Ok(BspChild::Leaf(order[0]));
        }

        let split = self
            .find_split(order)
            .ok_or(LevelError::Empty("axial split line"))?;
        let (normal, at) = split;
        let plane = Plane::new(normal, at);

        // partition: front = rooms fully on the normal side
        let mut front: Vec<usize> = Vec::new();
        let mut back: Vec<usize> = Vec::new();
        for &r in order.iter() {
            let bb = self.rooms[r].bounds();
            if plane.point_dist(bb.min) >= -1e-3 {
                front.push(r);
            } else {
                back.push(r);
            }
        }

        let front_child = self.split_rooms(&mut front, nodes)?;
        let back_child = self.split_rooms(&mut back, nodes)?;
        let front_bb = self.bounds_of(&front);
        let back_bb = self.bounds_of(&back);
        nodes.push(Node {
            plane,
            bbox: [front_bb, back_bb],
            children: [front_child, back_child],
        });
        Ok(BspChild::Node(nodes.len() - 1))
    }

    fn bounds_of(&self, rooms: &[usize]) -> Aabb {
        let mut bb = Aabb::EMPTY;
        for &r in rooms {
            bb.union(&self.rooms[r].bounds());
        }
        bb
    }

    /// Find an axial line that cleanly separates the set into two groups.
    fn find_split(&self, order: &[usize]) -> Option<(Vec3, f32)> {
        for (axis, pick) in [
            (Vec3::new(1.0, 0.0, 0.0), 0usize),
            (Vec3::new(0.0, 1.0, 0.0), 1usize),
        ] {
            let mut candidates: Vec<f32> = Vec::new();
            for &r in order {
                let room = &self.rooms[r];
                candidates.push(if pick == 0 { room.x0 } else { room.y0 });
                candidates.push(if pick == 0 { room.x1 } else { room.y1 });
            }
            for &c in &candidates {
                let mut nf = 0usize;
                let mut nb = 0usize;
                let mut clean = true;
                for &r in order {
                    let room = &self.rooms[r];
                    let (lo, hi) = if pick == 0 {
                        (room.x0, room.x1)
                    } else {
                        (room.y0, room.y1)
                    };
                    if lo >= c - 1e-3 {
                        nf += 1;
                    } else if hi <= c + 1e-3 {
                        nb += 1;
                    } else {
                        clean = false;
                        break;
                    }
                }
                if clean && nf > 0 && nb > 0 {
                    return Some((axis, c));
                }
            }
        }
        None
    }
}

/// Pair up two-sided segs that run the same span in opposite directions.
fn link_partners(segs: &mut [Seg]) {
    for i in 0..segs.len() {
        if !segs[i].two_sided || segs[i].partner.is_some() {
            continue;
        }
        for j in i + 1..segs.len() {
            if !segs[j].two_sided || segs[j].partner.is_some() {
                continue;
            }
            let same = (segs[i].v1 - segs[j].v2).length2d_squared() < 1e-6
                && (segs[i].v2 - segs[j].v1).length2d_squared() < 1e-6;
            if same {
                segs[i].partner = Some(j);
                segs[j].partner = Some(i);
                break;
            }
        }
    }
}
