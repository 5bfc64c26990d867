// collision.rs — the collision model: an owned, immutable arena of BSP
// planes/nodes/leaves/brushes built once per map load, plus the point,
// box, and swept-box queries everything above it consumes.

use crate::bsp::{
    read_f32, read_i16, read_i32, read_u16, AreaPortalRecord, Lump, AREAPORTAL_SIZE, AREA_SIZE,
    BRUSHSIDE_SIZE, BRUSH_SIZE, BSP_VERSION, HEADER_LUMPS, LEAFBRUSH_SIZE, LEAF_SIZE,
    LUMP_AREAPORTALS, LUMP_AREAS, LUMP_BRUSHES, LUMP_BRUSHSIDES, LUMP_ENTITIES, LUMP_LEAFBRUSHES,
    LUMP_LEAFS, LUMP_MODELS, LUMP_NODES, LUMP_PLANES, LUMP_TEXINFO, LUMP_VISIBILITY,
    MAX_MAP_AREAPORTALS, MAX_MAP_AREAS, MAX_MAP_BRUSHES, MAX_MAP_BRUSHSIDES, MAX_MAP_ENTSTRING,
    MAX_MAP_LEAFBRUSHES, MAX_MAP_LEAFS, MAX_MAP_MODELS, MAX_MAP_NODES, MAX_MAP_PLANES,
    MAX_MAP_TEXINFO, MAX_MAP_VISIBILITY, MODEL_SIZE, NODE_SIZE, PLANE_SIZE, TEXINFO_SIZE,
    VIS_PHS, VIS_PVS,
};
use crate::shared::{
    angle_vectors, box_on_plane_side, dot, sub, Plane, Surface, TraceResult, Vec3,
    CONTENTS_MONSTER, CONTENTS_SOLID,
};
use crc::{Crc, CRC_32_ISO_HDLC};
use rayon::prelude::*;

/// Thickened-plane offset keeping roundoff from reporting a swept box as
/// stuck exactly at a boundary. 1/32 unit; existing content depends on it.
const DIST_EPSILON: f32 = 0.03125;

/// Below this record count, sequential parsing beats the rayon fork cost.
const PARALLEL_LUMP_THRESHOLD: usize = 64;

const MAP_CRC: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

// ============================================================
// Runtime structures (derived from the file records at load)
// ============================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct Node {
    pub plane: usize,
    /// Negative values encode leaves as -(leaf)-1.
    pub children: [i32; 2],
}

#[derive(Debug, Clone, Copy)]
pub struct BrushSide {
    pub plane: usize,
    /// Index into `surfaces`; None for sides with no material.
    pub surface: Option<usize>,
}

impl Default for BrushSide {
    fn default() -> Self {
        Self {
            plane: 0,
            surface: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Leaf {
    pub contents: i32,
    pub cluster: i32,
    pub area: i32,
    pub first_brush: u16,
    pub num_brushes: u16,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Brush {
    pub contents: i32,
    pub num_sides: i32,
    pub first_side: i32,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Area {
    pub num_portals: i32,
    pub first_portal: i32,
    pub flood_num: i32,
    pub flood_valid: i32,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Submodel {
    pub mins: Vec3,
    pub maxs: Vec3,
    pub origin: Vec3,
    pub headnode: i32,
}

#[derive(Debug, Clone, Default)]
pub struct VisOffsets {
    pub num_clusters: i32,
    /// Per cluster: [PVS offset, PHS offset] into the visibility blob.
    pub offsets: Vec<[i32; 2]>,
}

// ============================================================
// Per-thread trace scratch
// ============================================================

/// Mutable state a trace needs that cannot live on the immutable world:
/// the brush-deduplication stamps and per-thread query statistics. Keep
/// one per calling thread; queries then take `&self` on the world and may
/// run concurrently.
#[derive(Debug, Clone, Default)]
pub struct TraceScratch {
    stamp: u32,
    brush_stamp: Vec<u32>,
    pub traces: u64,
    pub brush_tests: u64,
}

impl TraceScratch {
    fn begin(&mut self, num_brushes: usize) {
        if self.brush_stamp.len() < num_brushes {
            self.brush_stamp.resize(num_brushes, 0);
        }
        self.stamp = self.stamp.wrapping_add(1);
        if self.stamp == 0 {
            // wrapped; stale stamps could collide, so clear them
            self.brush_stamp.fill(0);
            self.stamp = 1;
        }
        self.traces += 1;
    }

    #[inline]
    fn already_tested(&mut self, brush: usize) -> bool {
        if self.brush_stamp[brush] == self.stamp {
            return true;
        }
        self.brush_stamp[brush] = self.stamp;
        false
    }
}

// ============================================================
// Per-trace immutable parameters
// ============================================================

struct Sweep {
    start: Vec3,
    end: Vec3,
    mins: Vec3,
    maxs: Vec3,
    extents: Vec3,
    contents: i32,
    is_point: bool,
}

// ============================================================
// CollisionWorld
// ============================================================

pub struct CollisionWorld {
    pub name: String,

    pub planes: Vec<Plane>,
    pub nodes: Vec<Node>,
    pub leafs: Vec<Leaf>,
    pub leaf_brushes: Vec<u16>,
    pub brushes: Vec<Brush>,
    pub brush_sides: Vec<BrushSide>,
    pub surfaces: Vec<Surface>,
    pub submodels: Vec<Submodel>,
    pub areas: Vec<Area>,
    pub area_portals: Vec<AreaPortalRecord>,
    pub visibility: Vec<u8>,
    pub vis: VisOffsets,
    pub entity_string: String,

    // counts of the real map data; the vectors additionally carry the
    // synthetic box hull past these
    pub num_planes: usize,
    pub num_nodes: usize,
    pub num_leafs: usize,
    pub num_leaf_brushes: usize,
    pub num_brushes: usize,
    pub num_brush_sides: usize,
    pub num_clusters: usize,
    pub num_areas: usize,

    pub empty_leaf: i32,

    // synthetic box hull region
    pub box_headnode: usize,
    pub box_plane_start: usize,
    pub box_brush: usize,
    pub box_leaf: usize,

    // area-portal connectivity
    pub flood_valid: i32,
    pub portal_open: Vec<bool>,
    pub no_areas: bool,
}

impl CollisionWorld {
    /// World with no geometry; every query reports empty space.
    pub fn empty() -> Self {
        Self {
            name: String::new(),
            planes: Vec::new(),
            nodes: Vec::new(),
            leafs: vec![Leaf::default()],
            leaf_brushes: Vec::new(),
            brushes: Vec::new(),
            brush_sides: Vec::new(),
            surfaces: Vec::new(),
            submodels: vec![Submodel::default()],
            areas: vec![Area::default()],
            area_portals: Vec::new(),
            visibility: Vec::new(),
            vis: VisOffsets::default(),
            entity_string: String::new(),
            num_planes: 0,
            num_nodes: 0,
            num_leafs: 1,
            num_leaf_brushes: 0,
            num_brushes: 0,
            num_brush_sides: 0,
            num_clusters: 1,
            num_areas: 1,
            empty_leaf: -1,
            box_headnode: 0,
            box_plane_start: 0,
            box_brush: 0,
            box_leaf: 0,
            flood_valid: 0,
            portal_open: vec![false; MAX_MAP_AREAPORTALS],
            no_areas: false,
        }
    }

    // ============================================================
    // Loading — batch deserialization of fixed-size records in the
    // fixed dependency order. Malformed or over-capacity data is fatal.
    // ============================================================

    /// Build the world from raw map bytes. Returns the world and a CRC32
    /// of the file so the caller can verify peers loaded identical data.
    pub fn load(name: &str, data: &[u8]) -> (Self, u32) {
        let checksum = MAP_CRC.checksum(data);

        if data.len() < 8 + HEADER_LUMPS * 8 {
            panic!("{name}: truncated header");
        }
        let version = read_i32(data, 4);
        if version != BSP_VERSION {
            panic!("{name}: wrong version {version} (expected {BSP_VERSION})");
        }

        let mut lumps = [Lump::default(); HEADER_LUMPS];
        for (i, lump) in lumps.iter_mut().enumerate() {
            let base = 8 + i * 8;
            lump.offset = read_i32(data, base) as usize;
            lump.length = read_i32(data, base + 4) as usize;
        }

        let mut world = Self::empty();
        world.name = name.to_string();

        world.load_surfaces(data, &lumps[LUMP_TEXINFO]);
        world.load_leafs(data, &lumps[LUMP_LEAFS]);
        world.load_leaf_brushes(data, &lumps[LUMP_LEAFBRUSHES]);
        world.load_planes(data, &lumps[LUMP_PLANES]);
        world.load_brushes(data, &lumps[LUMP_BRUSHES]);
        world.load_brush_sides(data, &lumps[LUMP_BRUSHSIDES]);
        world.load_submodels(data, &lumps[LUMP_MODELS]);
        world.load_nodes(data, &lumps[LUMP_NODES]);
        world.load_areas(data, &lumps[LUMP_AREAS]);
        world.load_area_portals(data, &lumps[LUMP_AREAPORTALS]);
        world.load_visibility(data, &lumps[LUMP_VISIBILITY]);
        world.load_entity_string(data, &lumps[LUMP_ENTITIES]);

        world.init_box_hull();
        world.flood_area_connections();

        (world, checksum)
    }

    fn lump_count(name: &str, lump: &Lump, stride: usize, max: usize) -> usize {
        if lump.length % stride != 0 {
            panic!("odd {name} lump size {}", lump.length);
        }
        let count = lump.length / stride;
        if count > max {
            panic!("too many {name} records ({count} > {max})");
        }
        count
    }

    fn load_surfaces(&mut self, data: &[u8], lump: &Lump) {
        let count = Self::lump_count("texinfo", lump, TEXINFO_SIZE, MAX_MAP_TEXINFO);
        if count < 1 {
            panic!("map with no surfaces");
        }

        let parse = |i: usize| {
            let base = lump.offset + i * TEXINFO_SIZE;
            let mut surf = Surface {
                flags: read_i32(data, base + 32),
                value: read_i32(data, base + 36),
                ..Default::default()
            };
            // texture name sits after the projection vectors and flags
            let tex = &data[base + 40..base + 72];
            let len = tex.iter().position(|&b| b == 0).unwrap_or(32).min(15);
            surf.name[..len].copy_from_slice(&tex[..len]);
            surf
        };

        self.surfaces = if count >= PARALLEL_LUMP_THRESHOLD {
            (0..count).into_par_iter().map(parse).collect()
        } else {
            (0..count).map(parse).collect()
        };
    }

    fn load_leafs(&mut self, data: &[u8], lump: &Lump) {
        let count = Self::lump_count("leaf", lump, LEAF_SIZE, MAX_MAP_LEAFS);
        if count < 1 {
            panic!("map with no leaves");
        }

        let parse = |i: usize| {
            let base = lump.offset + i * LEAF_SIZE;
            Leaf {
                contents: read_i32(data, base),
                cluster: read_i16(data, base + 4) as i32,
                area: read_i16(data, base + 6) as i32,
                first_brush: read_u16(data, base + 24),
                num_brushes: read_u16(data, base + 26),
            }
        };

        self.leafs = if count >= PARALLEL_LUMP_THRESHOLD {
            (0..count).into_par_iter().map(parse).collect()
        } else {
            (0..count).map(parse).collect()
        };
        self.num_leafs = count;

        self.num_clusters = self
            .leafs
            .iter()
            .map(|l| if l.cluster >= 0 { l.cluster as usize + 1 } else { 0 })
            .max()
            .unwrap_or(0);

        if self.leafs[0].contents != CONTENTS_SOLID {
            panic!("leaf 0 is not the solid sentinel");
        }
        self.empty_leaf = self.leafs[1..self.num_leafs]
            .iter()
            .position(|l| l.contents == 0)
            .map(|i| i as i32 + 1)
            .unwrap_or(-1);
        if self.empty_leaf == -1 {
            panic!("map has no empty leaf");
        }
    }

    fn load_leaf_brushes(&mut self, data: &[u8], lump: &Lump) {
        let count = Self::lump_count("leafbrush", lump, LEAFBRUSH_SIZE, MAX_MAP_LEAFBRUSHES);
        if count < 1 {
            panic!("map with no leafbrushes");
        }
        self.leaf_brushes = (0..count)
            .map(|i| read_u16(data, lump.offset + i * LEAFBRUSH_SIZE))
            .collect();
        self.num_leaf_brushes = count;
    }

    fn load_planes(&mut self, data: &[u8], lump: &Lump) {
        let count = Self::lump_count("plane", lump, PLANE_SIZE, MAX_MAP_PLANES);
        if count < 1 {
            panic!("map with no planes");
        }

        let parse = |i: usize| {
            let base = lump.offset + i * PLANE_SIZE;
            let normal = [
                read_f32(data, base),
                read_f32(data, base + 4),
                read_f32(data, base + 8),
            ];
            Plane {
                normal,
                dist: read_f32(data, base + 12),
                kind: read_i32(data, base + 16) as u8,
                signbits: Plane::compute_signbits(&normal),
            }
        };

        self.planes = if count >= PARALLEL_LUMP_THRESHOLD {
            (0..count).into_par_iter().map(parse).collect()
        } else {
            (0..count).map(parse).collect()
        };
        self.num_planes = count;
    }

    fn load_brushes(&mut self, data: &[u8], lump: &Lump) {
        let count = Self::lump_count("brush", lump, BRUSH_SIZE, MAX_MAP_BRUSHES);

        let parse = |i: usize| {
            let base = lump.offset + i * BRUSH_SIZE;
            Brush {
                first_side: read_i32(data, base),
                num_sides: read_i32(data, base + 4),
                contents: read_i32(data, base + 8),
            }
        };

        self.brushes = if count >= PARALLEL_LUMP_THRESHOLD {
            (0..count).into_par_iter().map(parse).collect()
        } else {
            (0..count).map(parse).collect()
        };
        self.num_brushes = count;
    }

    fn load_brush_sides(&mut self, data: &[u8], lump: &Lump) {
        let count = Self::lump_count("brushside", lump, BRUSHSIDE_SIZE, MAX_MAP_BRUSHSIDES);

        let parse = |i: usize| {
            let base = lump.offset + i * BRUSHSIDE_SIZE;
            let texinfo = read_i16(data, base + 2);
            BrushSide {
                plane: read_u16(data, base) as usize,
                surface: (texinfo >= 0).then_some(texinfo as usize),
            }
        };

        self.brush_sides = if count >= PARALLEL_LUMP_THRESHOLD {
            (0..count).into_par_iter().map(parse).collect()
        } else {
            (0..count).map(parse).collect()
        };
        self.num_brush_sides = count;

        for (i, side) in self.brush_sides.iter().enumerate() {
            if side.plane >= self.num_planes {
                panic!("brushside {i} references plane {} out of range", side.plane);
            }
            if let Some(s) = side.surface {
                if s >= self.surfaces.len() {
                    panic!("brushside {i} references texinfo {s} out of range");
                }
            }
        }
    }

    fn load_submodels(&mut self, data: &[u8], lump: &Lump) {
        let count = Self::lump_count("submodel", lump, MODEL_SIZE, MAX_MAP_MODELS);
        if count < 1 {
            panic!("map with no models");
        }

        let parse = |i: usize| {
            let base = lump.offset + i * MODEL_SIZE;
            let mut model = Submodel::default();
            for j in 0..3 {
                // spread the bounds by a unit against off-by-epsilon clipping
                model.mins[j] = read_f32(data, base + j * 4) - 1.0;
                model.maxs[j] = read_f32(data, base + 12 + j * 4) + 1.0;
                model.origin[j] = read_f32(data, base + 24 + j * 4);
            }
            model.headnode = read_i32(data, base + 36);
            model
        };

        self.submodels = if count >= PARALLEL_LUMP_THRESHOLD {
            (0..count).into_par_iter().map(parse).collect()
        } else {
            (0..count).map(parse).collect()
        };
    }

    fn load_nodes(&mut self, data: &[u8], lump: &Lump) {
        let count = Self::lump_count("node", lump, NODE_SIZE, MAX_MAP_NODES);
        if count < 1 {
            panic!("map with no nodes");
        }

        let parse = |i: usize| {
            let base = lump.offset + i * NODE_SIZE;
            Node {
                plane: read_i32(data, base) as usize,
                children: [read_i32(data, base + 4), read_i32(data, base + 8)],
            }
        };

        self.nodes = if count >= PARALLEL_LUMP_THRESHOLD {
            (0..count).into_par_iter().map(parse).collect()
        } else {
            (0..count).map(parse).collect()
        };
        self.num_nodes = count;

        for (i, node) in self.nodes.iter().enumerate() {
            if node.plane >= self.num_planes {
                panic!("node {i} references plane {} out of range", node.plane);
            }
            for &child in &node.children {
                if child >= 0 {
                    if child as usize >= count {
                        panic!("node {i} references node {child} out of range");
                    }
                } else if (-1 - child) as usize >= self.num_leafs {
                    panic!("node {i} references leaf {} out of range", -1 - child);
                }
            }
        }
    }

    fn load_areas(&mut self, data: &[u8], lump: &Lump) {
        let count = Self::lump_count("area", lump, AREA_SIZE, MAX_MAP_AREAS);
        self.areas = (0..count)
            .map(|i| {
                let base = lump.offset + i * AREA_SIZE;
                Area {
                    num_portals: read_i32(data, base),
                    first_portal: read_i32(data, base + 4),
                    flood_num: 0,
                    flood_valid: 0,
                }
            })
            .collect();
        self.num_areas = count;
    }

    fn load_area_portals(&mut self, data: &[u8], lump: &Lump) {
        let count = Self::lump_count("areaportal", lump, AREAPORTAL_SIZE, MAX_MAP_AREAPORTALS);
        self.area_portals = (0..count)
            .map(|i| {
                let base = lump.offset + i * AREAPORTAL_SIZE;
                AreaPortalRecord {
                    portal: read_i32(data, base),
                    other_area: read_i32(data, base + 4),
                }
            })
            .collect();
    }

    fn load_visibility(&mut self, data: &[u8], lump: &Lump) {
        if lump.length > MAX_MAP_VISIBILITY {
            panic!("visibility lump too large ({} bytes)", lump.length);
        }
        self.visibility = data[lump.offset..lump.offset + lump.length].to_vec();

        if lump.length >= 4 {
            let num_clusters = read_i32(&self.visibility, 0);
            self.vis.num_clusters = num_clusters;
            self.vis.offsets = (0..num_clusters as usize)
                .filter(|i| 4 + i * 8 + 8 <= lump.length)
                .map(|i| {
                    let base = 4 + i * 8;
                    [
                        read_i32(&self.visibility, base),
                        read_i32(&self.visibility, base + 4),
                    ]
                })
                .collect();
        }
    }

    fn load_entity_string(&mut self, data: &[u8], lump: &Lump) {
        if lump.length > MAX_MAP_ENTSTRING {
            panic!("entity lump too large ({} bytes)", lump.length);
        }
        self.entity_string =
            String::from_utf8_lossy(&data[lump.offset..lump.offset + lump.length]).to_string();
    }

    // ============================================================
    // Box hull — six synthetic planes/nodes and one brush appended past
    // the real map data, so a bare AABB can be traced against with the
    // same tree-walk code.
    // ============================================================

    fn init_box_hull(&mut self) {
        self.box_headnode = self.nodes.len();
        self.box_plane_start = self.planes.len();
        self.box_brush = self.brushes.len();
        self.box_leaf = self.leafs.len();

        if self.nodes.len() + 6 > MAX_MAP_NODES
            || self.brushes.len() + 1 > MAX_MAP_BRUSHES
            || self.leaf_brushes.len() + 1 > MAX_MAP_LEAFBRUSHES
            || self.brush_sides.len() + 6 > MAX_MAP_BRUSHSIDES
            || self.planes.len() + 12 > MAX_MAP_PLANES
        {
            panic!("not enough room for box hull");
        }

        self.brushes.push(Brush {
            contents: CONTENTS_MONSTER,
            num_sides: 6,
            first_side: self.brush_sides.len() as i32,
        });

        self.leafs.push(Leaf {
            contents: CONTENTS_MONSTER,
            cluster: 0,
            area: 0,
            first_brush: self.leaf_brushes.len() as u16,
            num_brushes: 1,
        });
        self.leaf_brushes.push(self.box_brush as u16);

        for i in 0..6 {
            let side = i & 1;

            self.brush_sides.push(BrushSide {
                plane: self.box_plane_start + i * 2 + side,
                surface: None,
            });

            let mut node = Node {
                plane: self.box_plane_start + i * 2,
                children: [0; 2],
            };
            node.children[side] = -1 - self.empty_leaf;
            node.children[side ^ 1] = if i != 5 {
                (self.box_headnode + i + 1) as i32
            } else {
                -1 - self.box_leaf as i32
            };
            self.nodes.push(node);

            let axis = i >> 1;
            let mut positive = Plane {
                kind: axis as u8,
                ..Default::default()
            };
            positive.normal[axis] = 1.0;
            self.planes.push(positive);

            let mut negative = Plane {
                kind: (3 + axis) as u8,
                ..Default::default()
            };
            negative.normal[axis] = -1.0;
            negative.signbits = Plane::compute_signbits(&negative.normal);
            self.planes.push(negative);
        }
    }

    /// Point the box hull at the given bounds and return its headnode.
    /// Setup-phase API: callers linking entities configure the hull, then
    /// trace against the returned headnode.
    pub fn headnode_for_box(&mut self, mins: &Vec3, maxs: &Vec3) -> i32 {
        let bp = self.box_plane_start;
        for axis in 0..3 {
            self.planes[bp + axis * 4].dist = maxs[axis];
            self.planes[bp + axis * 4 + 1].dist = -maxs[axis];
            self.planes[bp + axis * 4 + 2].dist = mins[axis];
            self.planes[bp + axis * 4 + 3].dist = -mins[axis];
        }
        self.box_headnode as i32
    }

    // ============================================================
    // Accessors
    // ============================================================

    /// Inline submodel lookup by its "*N" name (doors, platforms...).
    pub fn inline_model(&self, name: &str) -> &Submodel {
        let num: usize = name
            .strip_prefix('*')
            .and_then(|n| n.parse().ok())
            .expect("inline_model: bad name");
        if num < 1 || num >= self.submodels.len() {
            panic!("inline_model: bad number {num}");
        }
        &self.submodels[num]
    }

    pub fn num_inline_models(&self) -> usize {
        self.submodels.len()
    }

    pub fn leaf_contents(&self, leaf: usize) -> i32 {
        if leaf >= self.num_leafs {
            panic!("leaf_contents: bad leaf {leaf}");
        }
        self.leafs[leaf].contents
    }

    pub fn leaf_cluster(&self, leaf: usize) -> i32 {
        if leaf >= self.num_leafs {
            panic!("leaf_cluster: bad leaf {leaf}");
        }
        self.leafs[leaf].cluster
    }

    pub fn leaf_area(&self, leaf: usize) -> i32 {
        if leaf >= self.num_leafs {
            panic!("leaf_area: bad leaf {leaf}");
        }
        self.leafs[leaf].area
    }

    // ============================================================
    // Point queries
    // ============================================================

    /// Descend from `headnode` to the leaf containing `p`.
    pub fn leaf_for_point_from(&self, p: &Vec3, headnode: i32) -> usize {
        let mut num = headnode;
        while num >= 0 {
            let node = &self.nodes[num as usize];
            let plane = &self.planes[node.plane];
            let d = if (plane.kind as usize) < 3 {
                p[plane.kind as usize] - plane.dist
            } else {
                dot(&plane.normal, p) - plane.dist
            };
            num = node.children[usize::from(d < 0.0)];
        }
        (-1 - num) as usize
    }

    pub fn leaf_for_point(&self, p: &Vec3) -> usize {
        if self.num_planes == 0 {
            return 0;
        }
        self.leaf_for_point_from(p, 0)
    }

    pub fn point_contents(&self, p: &Vec3, headnode: i32) -> i32 {
        if self.num_nodes == 0 {
            return 0;
        }
        self.leafs[self.leaf_for_point_from(p, headnode)].contents
    }

    /// Contents at `p` inside a rotated/translated submodel's local frame.
    pub fn transformed_point_contents(
        &self,
        p: &Vec3,
        headnode: i32,
        origin: &Vec3,
        angles: &Vec3,
    ) -> i32 {
        let mut local = sub(p, origin);

        if headnode as usize != self.box_headnode
            && (angles[0] != 0.0 || angles[1] != 0.0 || angles[2] != 0.0)
        {
            let mut forward = [0.0f32; 3];
            let mut right = [0.0f32; 3];
            let mut up = [0.0f32; 3];
            angle_vectors(angles, Some(&mut forward), Some(&mut right), Some(&mut up));

            let t = local;
            local[0] = dot(&t, &forward);
            local[1] = -dot(&t, &right);
            local[2] = dot(&t, &up);
        }

        self.leafs[self.leaf_for_point_from(&local, headnode)].contents
    }

    // ============================================================
    // Box-in-region enumeration
    // ============================================================

    fn box_leafs_r(
        &self,
        mut num: i32,
        mins: &Vec3,
        maxs: &Vec3,
        out: &mut [usize],
        count: &mut usize,
        topnode: &mut i32,
    ) {
        loop {
            if num < 0 {
                // when full, stop storing but keep walking so topnode
                // still reflects the whole box
                if *count < out.len() {
                    out[*count] = (-1 - num) as usize;
                    *count += 1;
                }
                return;
            }

            let node = &self.nodes[num as usize];
            let plane = &self.planes[node.plane];
            match box_on_plane_side(mins, maxs, plane) {
                1 => num = node.children[0],
                2 => num = node.children[1],
                _ => {
                    if *topnode == -1 {
                        *topnode = num;
                    }
                    self.box_leafs_r(node.children[0], mins, maxs, out, count, topnode);
                    num = node.children[1];
                }
            }
        }
    }

    /// Collect the leaves a box overlaps into the caller's slice, starting
    /// at `headnode`. Returns (stored count, topnode) where topnode is the
    /// shallowest node at which the descent diverged (-1 if it never did).
    pub fn box_leafs_from(
        &self,
        mins: &Vec3,
        maxs: &Vec3,
        headnode: i32,
        out: &mut [usize],
    ) -> (usize, i32) {
        let mut count = 0;
        let mut topnode = -1;
        self.box_leafs_r(headnode, mins, maxs, out, &mut count, &mut topnode);
        (count, topnode)
    }

    pub fn box_leafs(&self, mins: &Vec3, maxs: &Vec3, out: &mut [usize]) -> (usize, i32) {
        let headnode = self.submodels.first().map(|m| m.headnode).unwrap_or(0);
        self.box_leafs_from(mins, maxs, headnode, out)
    }

    // ============================================================
    // Swept-box trace
    // ============================================================
    // Brush testing is inherently sequential per trace: the stamp dedup,
    // the zero-fraction short circuit, and the nearest-fraction fold all
    // depend on prior results.

    fn clip_brush(&self, sweep: &Sweep, brush: usize, trace: &mut TraceResult) {
        let b = &self.brushes[brush];
        if b.num_sides == 0 {
            return;
        }

        let mut enter_frac = -1.0f32;
        let mut leave_frac = 1.0f32;
        let mut clip_plane: Option<usize> = None;
        let mut lead_side: Option<usize> = None;

        let mut getout = false;
        let mut startout = false;

        for i in 0..b.num_sides {
            let side_idx = (b.first_side + i) as usize;
            let side = &self.brush_sides[side_idx];
            let plane = &self.planes[side.plane];

            let dist = if sweep.is_point {
                plane.dist
            } else {
                // push the plane out by the box's support point
                let mut ofs = [0.0f32; 3];
                for j in 0..3 {
                    ofs[j] = if plane.normal[j] < 0.0 {
                        sweep.maxs[j]
                    } else {
                        sweep.mins[j]
                    };
                }
                plane.dist - dot(&ofs, &plane.normal)
            };

            let d1 = dot(&sweep.start, &plane.normal) - dist;
            let d2 = dot(&sweep.end, &plane.normal) - dist;

            if d2 > 0.0 {
                getout = true;
            }
            if d1 > 0.0 {
                startout = true;
            }

            // completely in front of this face, moving away or parallel
            if d1 > 0.0 && d2 >= d1 {
                return;
            }
            if d1 <= 0.0 && d2 <= 0.0 {
                continue;
            }

            if d1 > d2 {
                // entering
                let f = (d1 - DIST_EPSILON) / (d1 - d2);
                if f > enter_frac {
                    enter_frac = f;
                    clip_plane = Some(side.plane);
                    lead_side = Some(side_idx);
                }
            } else {
                // leaving
                let f = (d1 + DIST_EPSILON) / (d1 - d2);
                if f < leave_frac {
                    leave_frac = f;
                }
            }
        }

        if !startout {
            // original point was inside this brush
            trace.startsolid = true;
            if !getout {
                trace.allsolid = true;
            }
            return;
        }

        if enter_frac < leave_frac && enter_frac > -1.0 && enter_frac < trace.fraction {
            trace.fraction = enter_frac.max(0.0);
            if let Some(p) = clip_plane {
                trace.plane = self.planes[p];
            }
            if let Some(s) = lead_side {
                trace.surface = Some(
                    self.brush_sides[s]
                        .surface
                        .map(|idx| self.surfaces[idx])
                        .unwrap_or_default(),
                );
            }
            trace.contents = b.contents;
        }
    }

    fn test_brush(&self, sweep: &Sweep, brush: usize, trace: &mut TraceResult) {
        let b = &self.brushes[brush];
        if b.num_sides == 0 {
            return;
        }

        for i in 0..b.num_sides {
            let side = &self.brush_sides[(b.first_side + i) as usize];
            let plane = &self.planes[side.plane];

            let mut ofs = [0.0f32; 3];
            for j in 0..3 {
                ofs[j] = if plane.normal[j] < 0.0 {
                    sweep.maxs[j]
                } else {
                    sweep.mins[j]
                };
            }
            let dist = plane.dist - dot(&ofs, &plane.normal);
            if dot(&sweep.start, &plane.normal) - dist > 0.0 {
                return;
            }
        }

        // inside this brush
        trace.startsolid = true;
        trace.allsolid = true;
        trace.fraction = 0.0;
        trace.contents = b.contents;
    }

    fn sweep_leaf(
        &self,
        scratch: &mut TraceScratch,
        sweep: &Sweep,
        leaf: usize,
        trace: &mut TraceResult,
    ) {
        if self.leafs[leaf].contents & sweep.contents == 0 {
            return;
        }
        let first = self.leafs[leaf].first_brush as usize;
        let count = self.leafs[leaf].num_brushes as usize;

        for k in 0..count {
            let brush = self.leaf_brushes[first + k] as usize;
            if scratch.already_tested(brush) {
                continue;
            }
            if self.brushes[brush].contents & sweep.contents == 0 {
                continue;
            }
            scratch.brush_tests += 1;
            self.clip_brush(sweep, brush, trace);
            if trace.fraction == 0.0 {
                return;
            }
        }
    }

    fn test_leaf(
        &self,
        scratch: &mut TraceScratch,
        sweep: &Sweep,
        leaf: usize,
        trace: &mut TraceResult,
    ) {
        if self.leafs[leaf].contents & sweep.contents == 0 {
            return;
        }
        let first = self.leafs[leaf].first_brush as usize;
        let count = self.leafs[leaf].num_brushes as usize;

        for k in 0..count {
            let brush = self.leaf_brushes[first + k] as usize;
            if scratch.already_tested(brush) {
                continue;
            }
            if self.brushes[brush].contents & sweep.contents == 0 {
                continue;
            }
            scratch.brush_tests += 1;
            self.test_brush(sweep, brush, trace);
            if trace.fraction == 0.0 {
                return;
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn sweep_node(
        &self,
        scratch: &mut TraceScratch,
        sweep: &Sweep,
        num: i32,
        p1f: f32,
        p2f: f32,
        p1: &Vec3,
        p2: &Vec3,
        trace: &mut TraceResult,
    ) {
        // something closer already blocked this interval
        if trace.fraction <= p1f {
            return;
        }

        if num < 0 {
            self.sweep_leaf(scratch, sweep, (-1 - num) as usize, trace);
            return;
        }

        let node = &self.nodes[num as usize];
        let children = node.children;
        let plane = &self.planes[node.plane];

        // distances of the segment ends to the plane, and the box's reach
        let (t1, t2, offset);
        if (plane.kind as usize) < 3 {
            let axis = plane.kind as usize;
            t1 = p1[axis] - plane.dist;
            t2 = p2[axis] - plane.dist;
            offset = sweep.extents[axis];
        } else {
            t1 = dot(&plane.normal, p1) - plane.dist;
            t2 = dot(&plane.normal, p2) - plane.dist;
            offset = if sweep.is_point {
                0.0
            } else {
                (sweep.extents[0] * plane.normal[0]).abs()
                    + (sweep.extents[1] * plane.normal[1]).abs()
                    + (sweep.extents[2] * plane.normal[2]).abs()
            };
        }

        if t1 >= offset && t2 >= offset {
            self.sweep_node(scratch, sweep, children[0], p1f, p2f, p1, p2, trace);
            return;
        }
        if t1 < -offset && t2 < -offset {
            self.sweep_node(scratch, sweep, children[1], p1f, p2f, p1, p2, trace);
            return;
        }

        // the segment spans the thickened plane: split it, visiting the
        // near side first
        let (side, frac, frac2);
        if t1 < t2 {
            let idist = 1.0 / (t1 - t2);
            side = 1usize;
            frac = ((t1 - offset + DIST_EPSILON) * idist).clamp(0.0, 1.0);
            frac2 = ((t1 + offset + DIST_EPSILON) * idist).clamp(0.0, 1.0);
        } else if t1 > t2 {
            let idist = 1.0 / (t1 - t2);
            side = 0usize;
            frac = ((t1 + offset + DIST_EPSILON) * idist).clamp(0.0, 1.0);
            frac2 = ((t1 - offset - DIST_EPSILON) * idist).clamp(0.0, 1.0);
        } else {
            side = 0;
            frac = 1.0;
            frac2 = 0.0;
        }

        let midf = p1f + (p2f - p1f) * frac;
        let mid = [
            p1[0] + frac * (p2[0] - p1[0]),
            p1[1] + frac * (p2[1] - p1[1]),
            p1[2] + frac * (p2[2] - p1[2]),
        ];
        self.sweep_node(scratch, sweep, children[side], p1f, midf, p1, &mid, trace);

        let midf2 = p1f + (p2f - p1f) * frac2;
        let mid2 = [
            p1[0] + frac2 * (p2[0] - p1[0]),
            p1[1] + frac2 * (p2[1] - p1[1]),
            p1[2] + frac2 * (p2[2] - p1[2]),
        ];
        self.sweep_node(scratch, sweep, children[side ^ 1], midf2, p2f, &mid2, p2, trace);
    }

    /// Sweep a symmetric box from `start` to `end` and report the first
    /// contact with brushes whose contents intersect `mask`.
    pub fn box_trace(
        &self,
        scratch: &mut TraceScratch,
        start: &Vec3,
        end: &Vec3,
        mins: &Vec3,
        maxs: &Vec3,
        headnode: i32,
        mask: i32,
    ) -> TraceResult {
        scratch.begin(self.brushes.len());

        let mut trace = TraceResult::default();
        if self.num_nodes == 0 {
            trace.endpos = *end;
            return trace;
        }

        let is_point = *mins == [0.0; 3] && *maxs == [0.0; 3];
        let sweep = Sweep {
            start: *start,
            end: *end,
            mins: *mins,
            maxs: *maxs,
            extents: [
                (-mins[0]).max(maxs[0]),
                (-mins[1]).max(maxs[1]),
                (-mins[2]).max(maxs[2]),
            ],
            contents: mask,
            is_point,
        };

        // position test: no sweep, just check every leaf the box overlaps
        if start == end {
            let pad = [
                [start[0] + mins[0] - 1.0, start[1] + mins[1] - 1.0, start[2] + mins[2] - 1.0],
                [start[0] + maxs[0] + 1.0, start[1] + maxs[1] + 1.0, start[2] + maxs[2] + 1.0],
            ];
            let mut leafs = [0usize; 1024];
            let (count, _) = self.box_leafs_from(&pad[0], &pad[1], headnode, &mut leafs);
            for &leaf in &leafs[..count] {
                self.test_leaf(scratch, &sweep, leaf, &mut trace);
                if trace.allsolid {
                    break;
                }
            }
            trace.endpos = *start;
            return trace;
        }

        self.sweep_node(scratch, &sweep, headnode, 0.0, 1.0, start, end, &mut trace);

        if trace.fraction == 1.0 {
            trace.endpos = *end;
        } else {
            for i in 0..3 {
                trace.endpos[i] = start[i] + trace.fraction * (end[i] - start[i]);
            }
        }
        trace
    }

    /// Trace against a rotated/translated submodel by mapping the sweep
    /// into its local frame, then rotating the hit plane back out.
    #[allow(clippy::too_many_arguments)]
    pub fn transformed_box_trace(
        &self,
        scratch: &mut TraceScratch,
        start: &Vec3,
        end: &Vec3,
        mins: &Vec3,
        maxs: &Vec3,
        headnode: i32,
        mask: i32,
        origin: &Vec3,
        angles: &Vec3,
    ) -> TraceResult {
        let mut start_l = sub(start, origin);
        let mut end_l = sub(end, origin);

        let rotated = headnode as usize != self.box_headnode
            && (angles[0] != 0.0 || angles[1] != 0.0 || angles[2] != 0.0);

        if rotated {
            let mut forward = [0.0f32; 3];
            let mut right = [0.0f32; 3];
            let mut up = [0.0f32; 3];
            angle_vectors(angles, Some(&mut forward), Some(&mut right), Some(&mut up));

            let t = start_l;
            start_l = [dot(&t, &forward), -dot(&t, &right), dot(&t, &up)];
            let t = end_l;
            end_l = [dot(&t, &forward), -dot(&t, &right), dot(&t, &up)];
        }

        let mut trace = self.box_trace(scratch, &start_l, &end_l, mins, maxs, headnode, mask);

        if rotated && trace.fraction != 1.0 {
            let inverse = [-angles[0], -angles[1], -angles[2]];
            let mut forward = [0.0f32; 3];
            let mut right = [0.0f32; 3];
            let mut up = [0.0f32; 3];
            angle_vectors(&inverse, Some(&mut forward), Some(&mut right), Some(&mut up));

            let t = trace.plane.normal;
            trace.plane.normal = [dot(&t, &forward), -dot(&t, &right), dot(&t, &up)];
        }

        for i in 0..3 {
            trace.endpos[i] = start[i] + trace.fraction * (end[i] - start[i]);
        }
        trace
    }

    // ============================================================
    // Visibility
    // ============================================================

    fn decompress_vis(&self, offset: usize, out: &mut [u8]) -> usize {
        let row = (self.num_clusters + 7) >> 3;

        if offset == 0 || self.visibility.is_empty() {
            // no vis data: everything sees everything
            let n = row.min(out.len());
            out[..n].fill(0xff);
            return row;
        }

        let vis = &self.visibility;
        let mut inp = offset;
        let mut outp = 0;

        while outp < row && inp < vis.len() {
            if vis[inp] != 0 {
                if outp < out.len() {
                    out[outp] = vis[inp];
                }
                outp += 1;
                inp += 1;
                continue;
            }

            // run of zero bytes
            if inp + 1 >= vis.len() {
                break;
            }
            let mut run = vis[inp + 1] as usize;
            inp += 2;
            if outp + run > row {
                run = row - outp;
                log::warn!("vis decompression overrun in {}", self.name);
            }
            for _ in 0..run {
                if outp < out.len() {
                    out[outp] = 0;
                }
                outp += 1;
            }
        }
        row
    }

    /// Fill `out` with the potentially-visible-set row for a cluster.
    /// Returns the row length in bytes. Cluster -1 sees nothing.
    pub fn cluster_pvs(&self, cluster: i32, out: &mut [u8]) -> usize {
        self.cluster_row(cluster, VIS_PVS, out)
    }

    /// Potentially-hearable-set variant of [`cluster_pvs`].
    ///
    /// [`cluster_pvs`]: Self::cluster_pvs
    pub fn cluster_phs(&self, cluster: i32, out: &mut [u8]) -> usize {
        self.cluster_row(cluster, VIS_PHS, out)
    }

    fn cluster_row(&self, cluster: i32, column: usize, out: &mut [u8]) -> usize {
        let row = (self.num_clusters + 7) >> 3;
        if cluster == -1 {
            let n = row.min(out.len());
            out[..n].fill(0);
            return row;
        }
        let offset = self
            .vis
            .offsets
            .get(cluster as usize)
            .map(|o| o[column] as usize)
            .unwrap_or(0);
        self.decompress_vis(offset, out)
    }

    /// True if any leaf under `nodenum` has its cluster bit set in
    /// `visbits`.
    pub fn headnode_visible(&self, nodenum: i32, visbits: &[u8]) -> bool {
        if nodenum < 0 {
            let leaf = (-1 - nodenum) as usize;
            if leaf >= self.leafs.len() {
                return false;
            }
            let cluster = self.leafs[leaf].cluster;
            if cluster == -1 {
                return false;
            }
            let byte = (cluster >> 3) as usize;
            return byte < visbits.len() && visbits[byte] & (1 << (cluster & 7)) != 0;
        }

        let node = &self.nodes[nodenum as usize];
        self.headnode_visible(node.children[0], visbits)
            || self.headnode_visible(node.children[1], visbits)
    }

    // ============================================================
    // Area-portal connectivity
    // ============================================================

    fn flood_area(&mut self, area: usize, flood_num: i32) {
        if self.areas[area].flood_valid == self.flood_valid {
            if self.areas[area].flood_num == flood_num {
                return;
            }
            panic!("flood_area: reflooded area {area}");
        }

        self.areas[area].flood_num = flood_num;
        self.areas[area].flood_valid = self.flood_valid;

        let first = self.areas[area].first_portal as usize;
        let count = self.areas[area].num_portals as usize;
        for i in 0..count {
            let portal = self.area_portals[first + i];
            if self
                .portal_open
                .get(portal.portal as usize)
                .copied()
                .unwrap_or(false)
            {
                self.flood_area(portal.other_area as usize, flood_num);
            }
        }
    }

    pub fn flood_area_connections(&mut self) {
        self.flood_valid += 1;
        let mut flood_num = 0;

        // area 0 is not used
        for i in 1..self.num_areas {
            if self.areas[i].flood_valid == self.flood_valid {
                continue;
            }
            flood_num += 1;
            self.flood_area(i, flood_num);
        }
    }

    pub fn set_area_portal_state(&mut self, portal: usize, open: bool) {
        if portal > self.area_portals.len() {
            panic!("set_area_portal_state: bad portal {portal}");
        }
        self.portal_open[portal] = open;
        self.flood_area_connections();
    }

    pub fn areas_connected(&self, area1: usize, area2: usize) -> bool {
        if self.no_areas {
            return true;
        }
        if area1 >= self.num_areas || area2 >= self.num_areas {
            panic!("areas_connected: bad area");
        }
        self.areas[area1].flood_num == self.areas[area2].flood_num
    }

    /// Write the bitmask of areas reachable from `area` into `buffer`.
    /// Returns the byte count. Used by upstream frame serialization.
    pub fn write_area_bits(&self, buffer: &mut [u8], area: usize) -> usize {
        let bytes = (self.num_areas + 7) >> 3;
        let n = bytes.min(buffer.len());

        if self.no_areas {
            buffer[..n].fill(0xff);
            return bytes;
        }

        buffer[..n].fill(0);
        let flood_num = self.areas.get(area).map(|a| a.flood_num).unwrap_or(0);
        for i in 0..self.num_areas {
            if self.areas[i].flood_num == flood_num || area == 0 {
                let byte = i >> 3;
                if byte < buffer.len() {
                    buffer[byte] |= 1 << (i & 7);
                }
            }
        }
        bytes
    }
}

// ============================================================
// Tests
// ============================================================
