// shared.rs — math primitives, contents bits, and the types both the
// collision model and the movement integrator speak.

use bitflags::bitflags;

pub type Vec3 = [f32; 3];

pub const VEC3_ORIGIN: Vec3 = [0.0, 0.0, 0.0];

// angle indices
pub const PITCH: usize = 0;
pub const YAW: usize = 1;
pub const ROLL: usize = 2;

// ============================================================
// Vector math
// ============================================================

#[inline]
pub fn dot(a: &Vec3, b: &Vec3) -> f32 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

#[inline]
pub fn sub(a: &Vec3, b: &Vec3) -> Vec3 {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

#[inline]
pub fn add(a: &Vec3, b: &Vec3) -> Vec3 {
    [a[0] + b[0], a[1] + b[1], a[2] + b[2]]
}

#[inline]
pub fn scale(v: &Vec3, s: f32) -> Vec3 {
    [v[0] * s, v[1] * s, v[2] * s]
}

#[inline]
pub fn length(v: &Vec3) -> f32 {
    (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt()
}

pub fn cross(a: &Vec3, b: &Vec3) -> Vec3 {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

/// Normalize in place, returning the original length. Zero vectors are
/// left untouched (and report length 0).
pub fn normalize(v: &mut Vec3) -> f32 {
    let len = length(v);
    if len != 0.0 {
        let inv = 1.0 / len;
        v[0] *= inv;
        v[1] *= inv;
        v[2] *= inv;
    }
    len
}

/// Derive forward/right/up basis vectors from euler view angles (degrees).
pub fn angle_vectors(
    angles: &Vec3,
    forward: Option<&mut Vec3>,
    right: Option<&mut Vec3>,
    up: Option<&mut Vec3>,
) {
    let yaw = angles[YAW].to_radians();
    let (sy, cy) = (yaw.sin(), yaw.cos());
    let pitch = angles[PITCH].to_radians();
    let (sp, cp) = (pitch.sin(), pitch.cos());
    let roll = angles[ROLL].to_radians();
    let (sr, cr) = (roll.sin(), roll.cos());

    if let Some(f) = forward {
        f[0] = cp * cy;
        f[1] = cp * sy;
        f[2] = -sp;
    }
    if let Some(r) = right {
        r[0] = -sr * sp * cy + -cr * -sy;
        r[1] = -sr * sp * sy + -cr * cy;
        r[2] = -sr * cp;
    }
    if let Some(u) = up {
        u[0] = cr * sp * cy + -sr * -sy;
        u[1] = cr * sp * sy + -sr * cy;
        u[2] = cr * cp;
    }
}

// ============================================================
// Network angle quantization (16-bit circular)
// ============================================================

#[inline]
pub fn angle_to_short(x: f32) -> i32 {
    ((x * 65536.0 / 360.0) as i32) & 65535
}

#[inline]
pub fn short_to_angle(x: i16) -> f32 {
    (x as f32) * (360.0 / 65536.0)
}

// ============================================================
// Planes
// ============================================================

/// Axis-aligned plane kinds get a fast-path side test; anything >= 3 goes
/// through the full dot product.
pub const PLANE_X: u8 = 0;
pub const PLANE_Y: u8 = 1;
pub const PLANE_Z: u8 = 2;
pub const PLANE_ANY: u8 = 3;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Plane {
    pub normal: Vec3,
    pub dist: f32,
    /// 0-2 axial, 3+ non-axial.
    pub kind: u8,
    /// Sign bits of the normal components, precomputed at load time to
    /// accelerate box side tests.
    pub signbits: u8,
}

impl Plane {
    pub fn compute_signbits(normal: &Vec3) -> u8 {
        let mut bits = 0u8;
        for (i, &n) in normal.iter().enumerate() {
            if n < 0.0 {
                bits |= 1 << i;
            }
        }
        bits
    }
}

/// Classify a box against a plane: 1 = entirely in front, 2 = entirely
/// behind, 3 = straddling.
pub fn box_on_plane_side(mins: &Vec3, maxs: &Vec3, p: &Plane) -> i32 {
    // fast axial cases
    if (p.kind as usize) < 3 {
        let a = p.kind as usize;
        if p.dist <= mins[a] {
            return 1;
        }
        if p.dist >= maxs[a] {
            return 2;
        }
        return 3;
    }

    // general case: pick the near/far box corner by the normal's sign bits
    let (dist1, dist2) = match p.signbits {
        0 => (
            p.normal[0] * maxs[0] + p.normal[1] * maxs[1] + p.normal[2] * maxs[2],
            p.normal[0] * mins[0] + p.normal[1] * mins[1] + p.normal[2] * mins[2],
        ),
        1 => (
            p.normal[0] * mins[0] + p.normal[1] * maxs[1] + p.normal[2] * maxs[2],
            p.normal[0] * maxs[0] + p.normal[1] * mins[1] + p.normal[2] * mins[2],
        ),
        2 => (
            p.normal[0] * maxs[0] + p.normal[1] * mins[1] + p.normal[2] * maxs[2],
            p.normal[0] * mins[0] + p.normal[1] * maxs[1] + p.normal[2] * mins[2],
        ),
        3 => (
            p.normal[0] * mins[0] + p.normal[1] * mins[1] + p.normal[2] * maxs[2],
            p.normal[0] * maxs[0] + p.normal[1] * maxs[1] + p.normal[2] * mins[2],
        ),
        4 => (
            p.normal[0] * maxs[0] + p.normal[1] * maxs[1] + p.normal[2] * mins[2],
            p.normal[0] * mins[0] + p.normal[1] * mins[1] + p.normal[2] * maxs[2],
        ),
        5 => (
            p.normal[0] * mins[0] + p.normal[1] * maxs[1] + p.normal[2] * mins[2],
            p.normal[0] * maxs[0] + p.normal[1] * mins[1] + p.normal[2] * maxs[2],
        ),
        6 => (
            p.normal[0] * maxs[0] + p.normal[1] * mins[1] + p.normal[2] * mins[2],
            p.normal[0] * mins[0] + p.normal[1] * maxs[1] + p.normal[2] * maxs[2],
        ),
        7 => (
            p.normal[0] * mins[0] + p.normal[1] * mins[1] + p.normal[2] * mins[2],
            p.normal[0] * maxs[0] + p.normal[1] * maxs[1] + p.normal[2] * maxs[2],
        ),
        _ => (0.0, 0.0),
    };

    let mut sides = 0;
    if dist1 >= p.dist {
        sides = 1;
    }
    if dist2 < p.dist {
        sides |= 2;
    }
    sides
}

// ============================================================
// Contents bits — multiple bits may be set on one region
// ============================================================

pub const CONTENTS_SOLID: i32 = 1;
pub const CONTENTS_WINDOW: i32 = 2;
pub const CONTENTS_AUX: i32 = 4;
pub const CONTENTS_LAVA: i32 = 8;
pub const CONTENTS_SLIME: i32 = 16;
pub const CONTENTS_WATER: i32 = 32;
pub const CONTENTS_MIST: i32 = 64;

pub const CONTENTS_AREAPORTAL: i32 = 0x8000;
pub const CONTENTS_PLAYERCLIP: i32 = 0x10000;
pub const CONTENTS_MONSTERCLIP: i32 = 0x20000;

pub const CONTENTS_CURRENT_0: i32 = 0x40000;
pub const CONTENTS_CURRENT_90: i32 = 0x80000;
pub const CONTENTS_CURRENT_180: i32 = 0x100000;
pub const CONTENTS_CURRENT_270: i32 = 0x200000;
pub const CONTENTS_CURRENT_UP: i32 = 0x400000;
pub const CONTENTS_CURRENT_DOWN: i32 = 0x800000;

pub const CONTENTS_ORIGIN: i32 = 0x1000000;
pub const CONTENTS_MONSTER: i32 = 0x2000000;
pub const CONTENTS_DEADMONSTER: i32 = 0x4000000;
pub const CONTENTS_DETAIL: i32 = 0x8000000;
pub const CONTENTS_TRANSLUCENT: i32 = 0x10000000;
pub const CONTENTS_LADDER: i32 = 0x20000000;

pub const MASK_ALL: i32 = -1;
pub const MASK_SOLID: i32 = CONTENTS_SOLID | CONTENTS_WINDOW;
pub const MASK_PLAYERSOLID: i32 =
    CONTENTS_SOLID | CONTENTS_PLAYERCLIP | CONTENTS_WINDOW | CONTENTS_MONSTER;
pub const MASK_DEADSOLID: i32 = CONTENTS_SOLID | CONTENTS_PLAYERCLIP | CONTENTS_WINDOW;
pub const MASK_MONSTERSOLID: i32 =
    CONTENTS_SOLID | CONTENTS_MONSTERCLIP | CONTENTS_WINDOW | CONTENTS_MONSTER;
pub const MASK_WATER: i32 = CONTENTS_WATER | CONTENTS_LAVA | CONTENTS_SLIME;
pub const MASK_OPAQUE: i32 = CONTENTS_SOLID | CONTENTS_SLIME | CONTENTS_LAVA;
pub const MASK_CURRENT: i32 = CONTENTS_CURRENT_0
    | CONTENTS_CURRENT_90
    | CONTENTS_CURRENT_180
    | CONTENTS_CURRENT_270
    | CONTENTS_CURRENT_UP
    | CONTENTS_CURRENT_DOWN;

// surface flags
pub const SURF_LIGHT: i32 = 0x1;
pub const SURF_SLICK: i32 = 0x2;
pub const SURF_SKY: i32 = 0x4;
pub const SURF_WARP: i32 = 0x8;
pub const SURF_TRANS33: i32 = 0x10;
pub const SURF_TRANS66: i32 = 0x20;
pub const SURF_FLOWING: i32 = 0x40;
pub const SURF_NODRAW: i32 = 0x80;

// ============================================================
// Surfaces
// ============================================================

/// Trace-result metadata for the brush side that was hit. Not geometry.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Surface {
    pub name: [u8; 16],
    pub flags: i32,
    pub value: i32,
}

// ============================================================
// Trace result
// ============================================================

#[derive(Debug, Clone)]
pub struct TraceResult {
    /// The whole sweep stayed inside solid matter.
    pub allsolid: bool,
    /// The start point was already inside solid matter.
    pub startsolid: bool,
    /// Earliest blocked fraction along [start, end]; 1.0 = unobstructed.
    pub fraction: f32,
    pub endpos: Vec3,
    pub plane: Plane,
    pub surface: Option<Surface>,
    pub contents: i32,
    /// Owning entity index, attached by upstream post-processing. -1 = none.
    pub ent: i32,
}

impl Default for TraceResult {
    fn default() -> Self {
        Self {
            allsolid: false,
            startsolid: false,
            fraction: 1.0,
            endpos: [0.0; 3],
            plane: Plane::default(),
            surface: None,
            contents: 0,
            ent: -1,
        }
    }
}

// ============================================================
// Movement wire state — quantized, bit-accurate between peers
// ============================================================

/// Wire positions and velocities use 1/8-unit fixed point.
pub const COORD_FRAC: f32 = 0.125;

#[inline]
pub fn coord_to_wire(v: f32) -> i16 {
    (v * 8.0) as i16
}

#[inline]
pub fn wire_to_coord(v: i16) -> f32 {
    v as f32 * COORD_FRAC
}

/// Movement mode, selected per tick by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(i32)]
pub enum MoveKind {
    #[default]
    Normal = 0,
    Spectator = 1,
    Dead = 2,
    Gib = 3,
    Freeze = 4,
}

bitflags! {
    /// Per-entity movement flags carried on the wire.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct MoveFlags: u8 {
        const DUCKED         = 1;
        const JUMP_HELD      = 2;
        const ON_GROUND      = 4;
        const TIME_WATERJUMP = 8;
        const TIME_LAND      = 16;
        const TIME_TELEPORT  = 32;
        const NO_PREDICTION  = 64;
    }
}

/// The quantized state both sides must agree on byte for byte. No floats.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MoveWire {
    pub kind: MoveKind,
    /// 12.3 fixed point.
    pub origin: [i16; 3],
    /// 12.3 fixed point.
    pub velocity: [i16; 3],
    pub flags: MoveFlags,
    /// Countdown for timed effects (teleport pause, water jump, landing),
    /// in 8ms units.
    pub time: u8,
    pub gravity: i16,
    pub delta_angles: [i16; 3],
}

// ============================================================
// Per-tick input
// ============================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct MoveCmd {
    pub msec: u8,
    pub buttons: u8,
    pub angles: [i16; 3],
    pub forward: i16,
    pub side: i16,
    pub up: i16,
}

// ============================================================
// Full per-tick movement exchange
// ============================================================

pub const MAX_TOUCH: usize = 32;
pub const MAX_CLIP_PLANES: usize = 5;

/// Caller-owned movement state, mutated in place each tick. The trace and
/// point-contents callbacks live on a trait supplied at call time, not here.
#[derive(Debug, Clone)]
pub struct PlayerMove {
    // state (in/out)
    pub wire: MoveWire,

    // command (in)
    pub cmd: MoveCmd,
    /// First tick after (re)spawn: search around the quantized origin for a
    /// non-solid position before integrating.
    pub snap_initial: bool,

    // results (out)
    pub num_touch: i32,
    pub touch: [i32; MAX_TOUCH],
    pub view_angles: Vec3,
    pub view_height: f32,
    pub mins: Vec3,
    pub maxs: Vec3,
    pub ground_entity: i32,
    pub water_type: i32,
    /// 0 = dry, 1 = feet, 2 = waist, 3 = submerged.
    pub water_level: i32,

    /// Server-controlled air acceleration; 0 disables the capped air
    /// control rule.
    pub air_accelerate: f32,
}

impl Default for PlayerMove {
    fn default() -> Self {
        Self {
            wire: MoveWire::default(),
            cmd: MoveCmd::default(),
            snap_initial: false,
            num_touch: 0,
            touch: [-1; MAX_TOUCH],
            view_angles: [0.0; 3],
            view_height: 0.0,
            mins: [0.0; 3],
            maxs: [0.0; 3],
            ground_entity: -1,
            water_type: 0,
            water_level: 0,
            air_accelerate: 0.0,
        }
    }
}
