// brushsim-replay — drive a scripted input sequence through the movement
// integrator twice over the same collision world and verify the quantized
// state streams are bit-identical. Exits non-zero on divergence.

use std::cell::RefCell;
use std::process::ExitCode;

use brushsim_core::collision::{
    Area, Brush, BrushSide, CollisionWorld, Leaf, Node, Submodel, TraceScratch,
};
use brushsim_core::movement::{player_move, MoveContext, MoveCmd, MoveFlags, MoveKind, PlayerMove};
use brushsim_core::shared::{
    coord_to_wire, Plane, Surface, TraceResult, Vec3, CONTENTS_SOLID, MASK_PLAYERSOLID,
};
use crc::{Crc, CRC_32_ISO_HDLC};

const STATE_CRC: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

const TICKS: usize = 2000;

/// Arena geometry: a floor slab with a raised step and walls boxing the
/// play space in. The tree is deliberately coarse — one split at z=128
/// with every brush listed in the lower leaf — since per-brush clipping
/// is exact no matter how the leaves partition space.
fn arena() -> CollisionWorld {
    let mut w = CollisionWorld::empty();

    let axial = |axis: usize, flip: bool, dist: f32| -> Plane {
        let mut normal = [0.0f32; 3];
        normal[axis] = if flip { -1.0 } else { 1.0 };
        Plane {
            normal,
            dist,
            kind: if flip { 3 + axis as u8 } else { axis as u8 },
            signbits: Plane::compute_signbits(&normal),
        }
    };

    w.planes = vec![
        axial(2, false, 0.0),    // 0: floor top
        axial(2, true, 64.0),    // 1: floor bottom
        axial(0, false, 512.0),  // 2: outer +x
        axial(0, true, 512.0),   // 3: outer -x
        axial(1, false, 512.0),  // 4: outer +y
        axial(1, true, 512.0),   // 5: outer -y
        axial(2, false, 16.0),   // 6: step top
        axial(2, true, 0.0),     // 7: z >= 0
        axial(0, false, 256.0),  // 8: step east face
        axial(0, true, -128.0),  // 9: step west face
        axial(2, false, 128.0),  // 10: wall top, also the split plane
        axial(0, true, -448.0),  // 11: x >= 448
        axial(0, false, -448.0), // 12: x <= -448
        axial(1, true, -448.0),  // 13: y >= 448
        axial(1, false, -448.0), // 14: y <= -448
    ];
    w.num_planes = w.planes.len();

    let side = |plane: usize| BrushSide {
        plane,
        surface: Some(0),
    };
    w.brush_sides = vec![
        // floor slab, z in [-64, 0]
        side(0), side(1), side(2), side(3), side(4), side(5),
        // step block, x in [128, 256], z in [0, 16]
        side(6), side(7), side(8), side(9), side(4), side(5),
        // east wall, x in [448, 512], z in [0, 128]
        side(10), side(7), side(2), side(11), side(4), side(5),
        // west wall
        side(10), side(7), side(12), side(3), side(4), side(5),
        // north wall, y in [448, 512]
        side(10), side(7), side(2), side(3), side(4), side(13),
        // south wall
        side(10), side(7), side(2), side(3), side(14), side(5),
    ];
    w.num_brush_sides = w.brush_sides.len();

    w.brushes = (0..6)
        .map(|i| Brush {
            contents: CONTENTS_SOLID,
            num_sides: 6,
            first_side: i * 6,
        })
        .collect();
    w.num_brushes = 6;

    w.surfaces = vec![Surface::default()];

    w.leafs = vec![
        Leaf { contents: CONTENTS_SOLID, cluster: -1, area: 0, first_brush: 0, num_brushes: 0 },
        Leaf { contents: 0, cluster: 0, area: 1, first_brush: 0, num_brushes: 0 },
        Leaf { contents: CONTENTS_SOLID, cluster: -1, area: 1, first_brush: 0, num_brushes: 6 },
    ];
    w.num_leafs = 3;
    w.empty_leaf = 1;
    w.num_clusters = 1;

    w.leaf_brushes = vec![0, 1, 2, 3, 4, 5];
    w.num_leaf_brushes = 6;

    w.nodes = vec![Node {
        plane: 10,
        children: [-2, -3],
    }];
    w.num_nodes = 1;

    w.submodels = vec![Submodel {
        mins: [-513.0, -513.0, -65.0],
        maxs: [513.0, 513.0, 129.0],
        origin: [0.0; 3],
        headnode: 0,
    }];

    w.areas = vec![Area::default(), Area::default()];
    w.num_areas = 2;

    w
}

struct WorldView<'a> {
    world: &'a CollisionWorld,
    scratch: RefCell<TraceScratch>,
}

impl MoveContext for WorldView<'_> {
    fn trace(&self, start: &Vec3, mins: &Vec3, maxs: &Vec3, end: &Vec3) -> TraceResult {
        let mut trace = self.world.box_trace(
            &mut self.scratch.borrow_mut(),
            start,
            end,
            mins,
            maxs,
            0,
            MASK_PLAYERSOLID,
        );
        if trace.fraction < 1.0 || trace.startsolid {
            trace.ent = 0; // the world
        }
        trace
    }

    fn point_contents(&self, point: &Vec3) -> i32 {
        self.world.point_contents(point, 0)
    }
}

/// Scripted tour of the arena: run east over the step, circle, hop.
fn command_for_tick(i: usize) -> MoveCmd {
    MoveCmd {
        msec: 16,
        buttons: 0,
        angles: [0, ((i / 100) as i32 * 8192) as i16, 0],
        forward: if i % 160 < 120 { 400 } else { 0 },
        side: if i % 90 < 30 { 200 } else { 0 },
        up: if i % 75 == 0 { 127 } else { 0 },
    }
}

fn digest_wire(hasher: &mut crc::Digest<u32>, pm: &PlayerMove) {
    let w = &pm.wire;
    for v in w.origin.iter().chain(w.velocity.iter()) {
        hasher.update(&v.to_le_bytes());
    }
    hasher.update(&[w.flags.bits(), w.time]);
    hasher.update(&w.gravity.to_le_bytes());
    for v in &w.delta_angles {
        hasher.update(&v.to_le_bytes());
    }
}

fn run_session(world: &CollisionWorld) -> (u32, PlayerMove) {
    let view = WorldView {
        world,
        scratch: RefCell::new(TraceScratch::default()),
    };

    let mut pm = PlayerMove::default();
    pm.wire.kind = MoveKind::Normal;
    pm.wire.gravity = 800;
    pm.wire.origin = [coord_to_wire(-400.0), 0, coord_to_wire(24.0)];
    pm.wire.flags = MoveFlags::ON_GROUND;
    pm.air_accelerate = 0.0;

    let mut hasher = STATE_CRC.digest();
    for i in 0..TICKS {
        pm.cmd = command_for_tick(i);
        player_move(&mut pm, &view);
        digest_wire(&mut hasher, &pm);
    }

    let scratch = view.scratch.into_inner();
    log::debug!(
        "session ran {} traces, {} brush tests",
        scratch.traces,
        scratch.brush_tests
    );

    (hasher.finalize(), pm)
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let world = arena();
    log::info!(
        "arena: {} planes, {} nodes, {} brushes",
        world.num_planes,
        world.num_nodes,
        world.num_brushes
    );

    let (first, pm_a) = run_session(&world);
    let (second, pm_b) = run_session(&world);

    log::info!(
        "final position [{:.3} {:.3} {:.3}], state digest {first:08x}",
        pm_a.wire.origin[0] as f32 * 0.125,
        pm_a.wire.origin[1] as f32 * 0.125,
        pm_a.wire.origin[2] as f32 * 0.125,
    );

    if first != second || pm_a.wire != pm_b.wire {
        log::error!("replay diverged: {first:08x} vs {second:08x}");
        return ExitCode::FAILURE;
    }

    log::info!("replay deterministic over {TICKS} ticks");
    ExitCode::SUCCESS
}
