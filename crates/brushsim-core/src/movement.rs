// movement.rs — the deterministic player movement integrator. Runs
// identically on server and predicting clients: quantized wire state in,
// one command applied, quantized wire state out.

use crate::shared::{add, angle_vectors, cross, dot, length, normalize, scale, short_to_angle};

pub use crate::shared::{MoveCmd, MoveFlags, MoveKind, MoveWire, PlayerMove};
use crate::shared::{
    Plane, Surface, TraceResult, Vec3, CONTENTS_CURRENT_0, CONTENTS_CURRENT_180,
    CONTENTS_CURRENT_270, CONTENTS_CURRENT_90, CONTENTS_CURRENT_DOWN, CONTENTS_CURRENT_UP,
    CONTENTS_LADDER, CONTENTS_SLIME, CONTENTS_SOLID, CONTENTS_WATER, MASK_CURRENT, MASK_WATER,
    MAX_CLIP_PLANES, MAX_TOUCH, PITCH, VEC3_ORIGIN, YAW,
};

// ============================================================
// Constants — all of these are load-bearing for prediction; changing
// any of them desynchronizes peers
// ============================================================

const STEPSIZE: f32 = 18.0;
const STOP_EPSILON: f32 = 0.1;
const MIN_STEP_NORMAL: f32 = 0.7;

const PM_STOPSPEED: f32 = 100.0;
const PM_MAXSPEED: f32 = 300.0;
const PM_DUCKSPEED: f32 = 100.0;
const PM_ACCELERATE: f32 = 10.0;
const PM_WATERACCELERATE: f32 = 10.0;
const PM_FRICTION: f32 = 6.0;
const PM_WATERFRICTION: f32 = 1.0;
const PM_WATERSPEED: f32 = 400.0;

// ============================================================
// Collision callbacks supplied by the embedding engine
// ============================================================

/// How the integrator queries the world. The engine clips against the map
/// and whatever entities it considers solid for this mover.
pub trait MoveContext {
    fn trace(&self, start: &Vec3, mins: &Vec3, maxs: &Vec3, end: &Vec3) -> TraceResult;
    fn point_contents(&self, point: &Vec3) -> i32;
}

// ============================================================
// Per-tick local state — zeroed before each move
// ============================================================

#[derive(Clone, Default)]
struct MoveLocal {
    origin: Vec3,
    velocity: Vec3,

    forward: Vec3,
    right: Vec3,
    up: Vec3,
    frametime: f32,

    ground_surface: Option<Surface>,
    ground_plane: Plane,
    ground_contents: i32,

    previous_origin: [i16; 3],
    ladder: bool,
}

/// Slide off of the impacting surface.
fn clip_velocity(inv: &Vec3, normal: &Vec3, out: &mut Vec3, overbounce: f32) {
    let backoff = dot(inv, normal) * overbounce;
    for i in 0..3 {
        let change = normal[i] * backoff;
        out[i] = inv[i] - change;
        if out[i] > -STOP_EPSILON && out[i] < STOP_EPSILON {
            out[i] = 0.0;
        }
    }
}

// ============================================================
// Tick context — one PlayerMove, one command, one world view
// ============================================================

struct Tick<'a, C: MoveContext> {
    pm: &'a mut PlayerMove,
    pml: MoveLocal,
    world: &'a C,
}

impl<'a, C: MoveContext> Tick<'a, C> {
    // --------------------------------------------------------
    // Slide move: consume the frame's time against up to four
    // successive clip planes
    // --------------------------------------------------------
    fn slide_move(&mut self) {
        let numbumps = 4;
        let primal_velocity = self.pml.velocity;
        let mut numplanes: usize = 0;
        let mut planes = [[0.0f32; 3]; MAX_CLIP_PLANES];

        let mut time_left = self.pml.frametime;

        for _bump in 0..numbumps {
            let end = add(&self.pml.origin, &scale(&self.pml.velocity, time_left));

            let trace = self
                .world
                .trace(&self.pml.origin, &self.pm.mins, &self.pm.maxs, &end);

            if trace.allsolid {
                // trapped in a solid
                self.pml.velocity[2] = 0.0;
                return;
            }

            if trace.fraction > 0.0 {
                // covered some distance
                self.pml.origin = trace.endpos;
                numplanes = 0;
            }

            if trace.fraction == 1.0 {
                break;
            }

            // save entity for contact notification
            if (self.pm.num_touch as usize) < MAX_TOUCH && trace.ent >= 0 {
                self.pm.touch[self.pm.num_touch as usize] = trace.ent;
                self.pm.num_touch += 1;
            }

            time_left -= time_left * trace.fraction;

            if numplanes >= MAX_CLIP_PLANES {
                self.pml.velocity = VEC3_ORIGIN;
                break;
            }

            planes[numplanes] = trace.plane.normal;
            numplanes += 1;

            // clip velocity until it parallels every plane touched so far
            let mut found = false;
            for i in 0..numplanes {
                let inv = self.pml.velocity;
                clip_velocity(&inv, &planes[i], &mut self.pml.velocity, 1.01);
                let mut ok = true;
                for j in 0..numplanes {
                    if j != i && dot(&self.pml.velocity, &planes[j]) < 0.0 {
                        ok = false;
                        break;
                    }
                }
                if ok {
                    found = true;
                    break;
                }
            }

            if !found {
                // two planes form a crease; slide along it
                if numplanes != 2 {
                    self.pml.velocity = VEC3_ORIGIN;
                    break;
                }
                let dir = cross(&planes[0], &planes[1]);
                let d = dot(&dir, &self.pml.velocity);
                self.pml.velocity = scale(&dir, d);
            }

            // never turn against the original direction
            if dot(&self.pml.velocity, &primal_velocity) <= 0.0 {
                self.pml.velocity = VEC3_ORIGIN;
                break;
            }
        }

        if self.pm.wire.time != 0 {
            self.pml.velocity = primal_velocity;
        }
    }

    // --------------------------------------------------------
    // Step-slide: try the move flat, then stepped up, keep whichever
    // travels farther horizontally
    // --------------------------------------------------------
    fn step_slide_move(&mut self) {
        let start_o = self.pml.origin;
        let start_v = self.pml.velocity;

        self.slide_move();

        let down_o = self.pml.origin;
        let down_v = self.pml.velocity;

        let mut up = start_o;
        up[2] += STEPSIZE;

        let trace = self.world.trace(&up, &self.pm.mins, &self.pm.maxs, &up);
        if trace.allsolid {
            return; // can't step up
        }

        // try sliding from the raised position
        self.pml.origin = up;
        self.pml.velocity = start_v;

        self.slide_move();

        // push back down the step height
        let mut down = self.pml.origin;
        down[2] -= STEPSIZE;
        let trace = self
            .world
            .trace(&self.pml.origin, &self.pm.mins, &self.pm.maxs, &down);
        if !trace.allsolid {
            self.pml.origin = trace.endpos;
        }

        let up = self.pml.origin;

        let down_dist = (down_o[0] - start_o[0]) * (down_o[0] - start_o[0])
            + (down_o[1] - start_o[1]) * (down_o[1] - start_o[1]);
        let up_dist = (up[0] - start_o[0]) * (up[0] - start_o[0])
            + (up[1] - start_o[1]) * (up[1] - start_o[1]);

        if down_dist > up_dist || trace.plane.normal[2] < MIN_STEP_NORMAL {
            self.pml.origin = down_o;
            self.pml.velocity = down_v;
            return;
        }
        // walking up a slope: keep the flat move's vertical velocity
        self.pml.velocity[2] = down_v[2];
    }

    // --------------------------------------------------------
    // Friction
    // --------------------------------------------------------
    fn friction(&mut self) {
        let speed = length(&self.pml.velocity);
        if speed < 1.0 {
            self.pml.velocity[0] = 0.0;
            self.pml.velocity[1] = 0.0;
            return;
        }

        let mut drop = 0.0f32;

        // ground friction, unless the surface is slick
        let has_ground = self.pm.ground_entity >= 0;
        let slick = self
            .pml
            .ground_surface
            .as_ref()
            .is_some_and(|s| (s.flags & crate::shared::SURF_SLICK) != 0);

        if (has_ground && self.pml.ground_surface.is_some() && !slick) || self.pml.ladder {
            let control = if speed < PM_STOPSPEED {
                PM_STOPSPEED
            } else {
                speed
            };
            drop += control * PM_FRICTION * self.pml.frametime;
        }

        // water friction scales with immersion depth
        if self.pm.water_level != 0 && !self.pml.ladder {
            drop += speed * PM_WATERFRICTION * self.pm.water_level as f32 * self.pml.frametime;
        }

        let mut newspeed = speed - drop;
        if newspeed < 0.0 {
            newspeed = 0.0;
        }
        newspeed /= speed;

        self.pml.velocity[0] *= newspeed;
        self.pml.velocity[1] *= newspeed;
        self.pml.velocity[2] *= newspeed;
    }

    // --------------------------------------------------------
    // Acceleration
    // --------------------------------------------------------
    fn accelerate(&mut self, wishdir: &Vec3, wishspeed: f32, accel: f32) {
        let currentspeed = dot(&self.pml.velocity, wishdir);
        let addspeed = wishspeed - currentspeed;
        if addspeed <= 0.0 {
            return;
        }
        let mut accelspeed = accel * self.pml.frametime * wishspeed;
        if accelspeed > addspeed {
            accelspeed = addspeed;
        }
        for i in 0..3 {
            self.pml.velocity[i] += accelspeed * wishdir[i];
        }
    }

    /// Airborne variant: the along-wish speed that counts toward the cap
    /// is limited to 30, which is what makes air control gentle.
    fn air_accelerate(&mut self, wishdir: &Vec3, wishspeed: f32, accel: f32) {
        let wishspd = if wishspeed > 30.0 { 30.0 } else { wishspeed };
        let currentspeed = dot(&self.pml.velocity, wishdir);
        let addspeed = wishspd - currentspeed;
        if addspeed <= 0.0 {
            return;
        }
        let mut accelspeed = accel * wishspeed * self.pml.frametime;
        if accelspeed > addspeed {
            accelspeed = addspeed;
        }
        for i in 0..3 {
            self.pml.velocity[i] += accelspeed * wishdir[i];
        }
    }

    // --------------------------------------------------------
    // Environmental pushes: ladder clamping, water currents,
    // conveyor surfaces
    // --------------------------------------------------------
    fn add_currents(&mut self, wishvel: &mut Vec3) {
        if self.pml.ladder && self.pml.velocity[2].abs() <= 200.0 {
            if self.pm.view_angles[PITCH] <= -15.0 && self.pm.cmd.forward > 0 {
                wishvel[2] = 200.0;
            } else if self.pm.view_angles[PITCH] >= 15.0 && self.pm.cmd.forward > 0 {
                wishvel[2] = -200.0;
            } else if self.pm.cmd.up > 0 {
                wishvel[2] = 200.0;
            } else if self.pm.cmd.up < 0 {
                wishvel[2] = -200.0;
            } else {
                wishvel[2] = 0.0;
            }

            // limit horizontal speed when on a ladder
            wishvel[0] = wishvel[0].clamp(-25.0, 25.0);
            wishvel[1] = wishvel[1].clamp(-25.0, 25.0);
        }

        if (self.pm.water_type & MASK_CURRENT) != 0 {
            let mut v: Vec3 = [0.0; 3];

            if (self.pm.water_type & CONTENTS_CURRENT_0) != 0 {
                v[0] += 1.0;
            }
            if (self.pm.water_type & CONTENTS_CURRENT_90) != 0 {
                v[1] += 1.0;
            }
            if (self.pm.water_type & CONTENTS_CURRENT_180) != 0 {
                v[0] -= 1.0;
            }
            if (self.pm.water_type & CONTENTS_CURRENT_270) != 0 {
                v[1] -= 1.0;
            }
            if (self.pm.water_type & CONTENTS_CURRENT_UP) != 0 {
                v[2] += 1.0;
            }
            if (self.pm.water_type & CONTENTS_CURRENT_DOWN) != 0 {
                v[2] -= 1.0;
            }

            let mut s = PM_WATERSPEED;
            if self.pm.water_level == 1 && self.pm.ground_entity >= 0 {
                s /= 2.0;
            }

            for i in 0..3 {
                wishvel[i] += s * v[i];
            }
        }

        if self.pm.ground_entity >= 0 {
            let mut v: Vec3 = [0.0; 3];

            if (self.pml.ground_contents & CONTENTS_CURRENT_0) != 0 {
                v[0] += 1.0;
            }
            if (self.pml.ground_contents & CONTENTS_CURRENT_90) != 0 {
                v[1] += 1.0;
            }
            if (self.pml.ground_contents & CONTENTS_CURRENT_180) != 0 {
                v[0] -= 1.0;
            }
            if (self.pml.ground_contents & CONTENTS_CURRENT_270) != 0 {
                v[1] -= 1.0;
            }
            if (self.pml.ground_contents & CONTENTS_CURRENT_UP) != 0 {
                v[2] += 1.0;
            }
            if (self.pml.ground_contents & CONTENTS_CURRENT_DOWN) != 0 {
                v[2] -= 1.0;
            }

            for i in 0..3 {
                wishvel[i] += 100.0 * v[i];
            }
        }
    }

    // --------------------------------------------------------
    // Swimming
    // --------------------------------------------------------
    fn water_move(&mut self) {
        let fwd = self.pml.forward;
        let right = self.pml.right;
        let fm = self.pm.cmd.forward as f32;
        let sm = self.pm.cmd.side as f32;

        let mut wishvel: Vec3 = [0.0; 3];
        for i in 0..3 {
            wishvel[i] = fwd[i] * fm + right[i] * sm;
        }

        if self.pm.cmd.forward == 0 && self.pm.cmd.side == 0 && self.pm.cmd.up == 0 {
            wishvel[2] -= 60.0; // drift towards bottom
        } else {
            wishvel[2] += self.pm.cmd.up as f32;
        }

        self.add_currents(&mut wishvel);

        let mut wishdir = wishvel;
        let mut wishspeed = normalize(&mut wishdir);

        if wishspeed > PM_MAXSPEED {
            let s = PM_MAXSPEED / wishspeed;
            for i in 0..3 {
                wishvel[i] *= s;
            }
            wishspeed = PM_MAXSPEED;
        }
        wishspeed *= 0.5;

        self.accelerate(&wishdir, wishspeed, PM_WATERACCELERATE);

        self.step_slide_move();
    }

    // --------------------------------------------------------
    // Walking and airborne movement
    // --------------------------------------------------------
    fn air_move(&mut self) {
        let fmove = self.pm.cmd.forward as f32;
        let smove = self.pm.cmd.side as f32;
        let fwd = self.pml.forward;
        let right = self.pml.right;

        let mut wishvel: Vec3 = [0.0; 3];
        for i in 0..2 {
            wishvel[i] = fwd[i] * fmove + right[i] * smove;
        }
        wishvel[2] = 0.0;

        self.add_currents(&mut wishvel);

        let mut wishdir = wishvel;
        let mut wishspeed = normalize(&mut wishdir);

        let maxspeed = if self.pm.wire.flags.contains(MoveFlags::DUCKED) {
            PM_DUCKSPEED
        } else {
            PM_MAXSPEED
        };

        if wishspeed > maxspeed {
            let s = maxspeed / wishspeed;
            for i in 0..3 {
                wishvel[i] *= s;
            }
            wishspeed = maxspeed;
        }

        let gravity = self.pm.wire.gravity as f32;

        if self.pml.ladder {
            self.accelerate(&wishdir, wishspeed, PM_ACCELERATE);
            if wishvel[2] == 0.0 {
                // damp vertical drift toward zero while clinging
                if self.pml.velocity[2] > 0.0 {
                    self.pml.velocity[2] -= gravity * self.pml.frametime;
                    if self.pml.velocity[2] < 0.0 {
                        self.pml.velocity[2] = 0.0;
                    }
                } else {
                    self.pml.velocity[2] += gravity * self.pml.frametime;
                    if self.pml.velocity[2] > 0.0 {
                        self.pml.velocity[2] = 0.0;
                    }
                }
            }
            self.step_slide_move();
        } else if self.pm.ground_entity >= 0 {
            // walking on ground
            self.pml.velocity[2] = 0.0;
            self.accelerate(&wishdir, wishspeed, PM_ACCELERATE);

            // negative gravity fields push the walker upward
            if gravity > 0.0 {
                self.pml.velocity[2] = 0.0;
            } else {
                self.pml.velocity[2] -= gravity * self.pml.frametime;
            }

            if self.pml.velocity[0] == 0.0 && self.pml.velocity[1] == 0.0 {
                return;
            }
            self.step_slide_move();
        } else {
            // airborne: input has little effect on velocity
            if self.pm.air_accelerate != 0.0 {
                self.air_accelerate(&wishdir, wishspeed, PM_ACCELERATE);
            } else {
                self.accelerate(&wishdir, wishspeed, 1.0);
            }
            self.pml.velocity[2] -= gravity * self.pml.frametime;
            self.step_slide_move();
        }
    }

    // --------------------------------------------------------
    // Ground and water classification
    // --------------------------------------------------------
    fn categorize_position(&mut self) {
        // probe a quarter unit down for ground
        let mut point = self.pml.origin;
        point[2] -= 0.25;

        if self.pml.velocity[2] > 180.0 {
            self.pm.wire.flags.remove(MoveFlags::ON_GROUND);
            self.pm.ground_entity = -1;
        } else {
            let mut trace = self
                .world
                .trace(&self.pml.origin, &self.pm.mins, &self.pm.maxs, &point);

            // a corner overhanging a steep face can hide walkable ground
            // under the body; retry with a slightly shrunk box before
            // denying ground
            if trace.fraction < 1.0 && trace.plane.normal[2] < 0.7 && !trace.startsolid {
                let mins = [self.pm.mins[0] + 1.0, self.pm.mins[1] + 1.0, self.pm.mins[2]];
                let maxs = [self.pm.maxs[0] - 1.0, self.pm.maxs[1] - 1.0, self.pm.maxs[2]];
                let shrunk = self.world.trace(&self.pml.origin, &mins, &maxs, &point);
                if shrunk.fraction < 1.0 && shrunk.plane.normal[2] >= 0.7 && !shrunk.startsolid {
                    trace = shrunk;
                }
            }

            self.pml.ground_plane = trace.plane;
            self.pml.ground_surface = trace.surface;
            self.pml.ground_contents = trace.contents;

            if trace.ent < 0 || (trace.plane.normal[2] < 0.7 && !trace.startsolid) {
                self.pm.ground_entity = -1;
                self.pm.wire.flags.remove(MoveFlags::ON_GROUND);
            } else {
                self.pm.ground_entity = trace.ent;

                // hitting solid ground ends a waterjump
                if self.pm.wire.flags.contains(MoveFlags::TIME_WATERJUMP) {
                    self.pm.wire.flags.remove(
                        MoveFlags::TIME_WATERJUMP | MoveFlags::TIME_LAND | MoveFlags::TIME_TELEPORT,
                    );
                    self.pm.wire.time = 0;
                }

                if !self.pm.wire.flags.contains(MoveFlags::ON_GROUND) {
                    // just hit the ground
                    self.pm.wire.flags.insert(MoveFlags::ON_GROUND);
                    // no landing stun when merely descending a slope
                    if self.pml.velocity[2] < -200.0 {
                        self.pm.wire.flags.insert(MoveFlags::TIME_LAND);
                        if self.pml.velocity[2] < -400.0 {
                            self.pm.wire.time = 25;
                        } else {
                            self.pm.wire.time = 18;
                        }
                    }
                }
            }

            if (self.pm.num_touch as usize) < MAX_TOUCH && trace.ent >= 0 {
                self.pm.touch[self.pm.num_touch as usize] = trace.ent;
                self.pm.num_touch += 1;
            }
        }

        // water level from three samples up the body, accounting for ducking
        self.pm.water_level = 0;
        self.pm.water_type = 0;

        let sample2 = (self.pm.view_height - self.pm.mins[2]) as i32;
        let sample1 = sample2 / 2;

        let mut point = [
            self.pml.origin[0],
            self.pml.origin[1],
            self.pml.origin[2] + self.pm.mins[2] + 1.0,
        ];
        let cont = self.world.point_contents(&point);

        if (cont & MASK_WATER) != 0 {
            self.pm.water_type = cont;
            self.pm.water_level = 1;
            point[2] = self.pml.origin[2] + self.pm.mins[2] + sample1 as f32;
            let cont = self.world.point_contents(&point);
            if (cont & MASK_WATER) != 0 {
                self.pm.water_level = 2;
                point[2] = self.pml.origin[2] + self.pm.mins[2] + sample2 as f32;
                let cont = self.world.point_contents(&point);
                if (cont & MASK_WATER) != 0 {
                    self.pm.water_level = 3;
                }
            }
        }
    }

    // --------------------------------------------------------
    // Jumping and swimming up
    // --------------------------------------------------------
    fn check_jump(&mut self) {
        if self.pm.wire.flags.contains(MoveFlags::TIME_LAND) {
            // landing stun
            return;
        }

        if self.pm.cmd.up < 10 {
            self.pm.wire.flags.remove(MoveFlags::JUMP_HELD);
            return;
        }

        // must release jump between hops
        if self.pm.wire.flags.contains(MoveFlags::JUMP_HELD) {
            return;
        }

        if self.pm.wire.kind == MoveKind::Dead {
            return;
        }

        if self.pm.water_level >= 2 {
            // swimming, not jumping
            self.pm.ground_entity = -1;

            if self.pml.velocity[2] <= -300.0 {
                return;
            }

            if self.pm.water_type == CONTENTS_WATER {
                self.pml.velocity[2] = 100.0;
            } else if self.pm.water_type == CONTENTS_SLIME {
                self.pml.velocity[2] = 80.0;
            } else {
                self.pml.velocity[2] = 50.0;
            }
            return;
        }

        if self.pm.ground_entity < 0 {
            return; // in air, no effect
        }

        self.pm.wire.flags.insert(MoveFlags::JUMP_HELD);

        self.pm.ground_entity = -1;
        self.pml.velocity[2] += 270.0;
        if self.pml.velocity[2] < 270.0 {
            self.pml.velocity[2] = 270.0;
        }
    }

    // --------------------------------------------------------
    // Ladder grab and water-jump launch detection
    // --------------------------------------------------------
    fn check_special_movement(&mut self) {
        if self.pm.wire.time != 0 {
            return;
        }

        self.pml.ladder = false;

        // a ladder is any climbable brush within one unit ahead
        let mut flatforward: Vec3 = [self.pml.forward[0], self.pml.forward[1], 0.0];
        normalize(&mut flatforward);

        let spot = add(&self.pml.origin, &flatforward);
        let trace = self
            .world
            .trace(&self.pml.origin, &self.pm.mins, &self.pm.maxs, &spot);
        if trace.fraction < 1.0 && (trace.contents & CONTENTS_LADDER) != 0 {
            self.pml.ladder = true;
        }

        // waist-deep facing a ledge: solid 30 units ahead with clear air
        // above it means we can vault out of the water
        if self.pm.water_level != 2 {
            return;
        }

        let mut spot = [
            self.pml.origin[0] + 30.0 * flatforward[0],
            self.pml.origin[1] + 30.0 * flatforward[1],
            self.pml.origin[2] + 30.0 * flatforward[2] + 4.0,
        ];
        let cont = self.world.point_contents(&spot);
        if (cont & CONTENTS_SOLID) == 0 {
            return;
        }

        spot[2] += 16.0;
        let cont = self.world.point_contents(&spot);
        if cont != 0 {
            return;
        }

        // jump out of water
        self.pml.velocity = scale(&flatforward, 50.0);
        self.pml.velocity[2] = 350.0;

        self.pm.wire.flags.insert(MoveFlags::TIME_WATERJUMP);
        self.pm.wire.time = 255;
    }

    // --------------------------------------------------------
    // Spectator flight — frictional, optional clipping
    // --------------------------------------------------------
    fn fly_move(&mut self, doclip: bool) {
        self.pm.view_height = 22.0;

        // extra friction so flight stops crisply
        let speed = length(&self.pml.velocity);
        if speed < 1.0 {
            self.pml.velocity = VEC3_ORIGIN;
        } else {
            let friction = PM_FRICTION * 1.5;
            let control = if speed < PM_STOPSPEED {
                PM_STOPSPEED
            } else {
                speed
            };
            let drop: f32 = control * friction * self.pml.frametime;

            let mut newspeed = speed - drop;
            if newspeed < 0.0 {
                newspeed = 0.0;
            }
            newspeed /= speed;

            self.pml.velocity = scale(&self.pml.velocity, newspeed);
        }

        let fmove = self.pm.cmd.forward as f32;
        let smove = self.pm.cmd.side as f32;

        normalize(&mut self.pml.forward);
        normalize(&mut self.pml.right);

        let fwd = self.pml.forward;
        let right = self.pml.right;

        let mut wishvel: Vec3 = [0.0; 3];
        for i in 0..3 {
            wishvel[i] = fwd[i] * fmove + right[i] * smove;
        }
        wishvel[2] += self.pm.cmd.up as f32;

        let mut wishdir = wishvel;
        let mut wishspeed = normalize(&mut wishdir);

        if wishspeed > PM_MAXSPEED {
            let s = PM_MAXSPEED / wishspeed;
            for i in 0..3 {
                wishvel[i] *= s;
            }
            wishspeed = PM_MAXSPEED;
        }

        let currentspeed = dot(&self.pml.velocity, &wishdir);
        let addspeed = wishspeed - currentspeed;
        if addspeed <= 0.0 {
            return;
        }
        let mut accelspeed = PM_ACCELERATE * self.pml.frametime * wishspeed;
        if accelspeed > addspeed {
            accelspeed = addspeed;
        }

        for i in 0..3 {
            self.pml.velocity[i] += accelspeed * wishdir[i];
        }

        if doclip {
            let end = add(&self.pml.origin, &scale(&self.pml.velocity, self.pml.frametime));

            let trace = self
                .world
                .trace(&self.pml.origin, &self.pm.mins, &self.pm.maxs, &end);
            self.pml.origin = trace.endpos;
        } else {
            for i in 0..3 {
                self.pml.origin[i] += self.pml.frametime * self.pml.velocity[i];
            }
        }
    }

    // --------------------------------------------------------
    // Bounding box and eye height for the current stance
    // --------------------------------------------------------
    fn check_duck(&mut self) {
        self.pm.mins[0] = -16.0;
        self.pm.mins[1] = -16.0;

        self.pm.maxs[0] = 16.0;
        self.pm.maxs[1] = 16.0;

        if self.pm.wire.kind == MoveKind::Gib {
            self.pm.mins[2] = 0.0;
            self.pm.maxs[2] = 16.0;
            self.pm.view_height = 8.0;
            return;
        }

        self.pm.mins[2] = -24.0;

        if self.pm.wire.kind == MoveKind::Dead {
            self.pm.wire.flags.insert(MoveFlags::DUCKED);
        } else if self.pm.cmd.up < 0 && self.pm.wire.flags.contains(MoveFlags::ON_GROUND) {
            // duck
            self.pm.wire.flags.insert(MoveFlags::DUCKED);
        } else if self.pm.wire.flags.contains(MoveFlags::DUCKED) {
            // stand up only when there is headroom
            self.pm.maxs[2] = 32.0;
            let trace = self.world.trace(
                &self.pml.origin,
                &self.pm.mins,
                &self.pm.maxs,
                &self.pml.origin,
            );
            if !trace.allsolid {
                self.pm.wire.flags.remove(MoveFlags::DUCKED);
            }
        }

        if self.pm.wire.flags.contains(MoveFlags::DUCKED) {
            self.pm.maxs[2] = 4.0;
            self.pm.view_height = -2.0;
        } else {
            self.pm.maxs[2] = 32.0;
            self.pm.view_height = 22.0;
        }
    }

    // --------------------------------------------------------
    // Corpse slide-out
    // --------------------------------------------------------
    fn dead_move(&mut self) {
        if self.pm.ground_entity < 0 {
            return;
        }

        // extra friction
        let mut speed = length(&self.pml.velocity);
        speed -= 20.0;
        if speed <= 0.0 {
            self.pml.velocity = VEC3_ORIGIN;
        } else {
            normalize(&mut self.pml.velocity);
            self.pml.velocity = scale(&self.pml.velocity, speed);
        }
    }

    // --------------------------------------------------------
    // Quantization — the wire origin must decode to a non-solid spot
    // --------------------------------------------------------
    fn good_position(&self) -> bool {
        if self.pm.wire.kind == MoveKind::Spectator {
            return true;
        }

        let origin: Vec3 = [
            self.pm.wire.origin[0] as f32 * 0.125,
            self.pm.wire.origin[1] as f32 * 0.125,
            self.pm.wire.origin[2] as f32 * 0.125,
        ];
        let trace = self
            .world
            .trace(&origin, &self.pm.mins, &self.pm.maxs, &origin);
        !trace.allsolid
    }

    fn snap_position(&mut self) {
        // jitter combinations in cheap-to-expensive order; the order is
        // part of the deterministic contract
        static JITTERBITS: [i32; 8] = [0, 4, 1, 2, 3, 5, 6, 7];

        // snap velocity to eighths
        for i in 0..3 {
            self.pm.wire.velocity[i] = (self.pml.velocity[i] * 8.0) as i16;
        }

        let mut sign = [0i32; 3];
        for i in 0..3 {
            sign[i] = if self.pml.origin[i] >= 0.0 { 1 } else { -1 };
            self.pm.wire.origin[i] = (self.pml.origin[i] * 8.0) as i16;
            if self.pm.wire.origin[i] as f32 * 0.125 == self.pml.origin[i] {
                sign[i] = 0;
            }
        }
        let base = self.pm.wire.origin;

        for &bits in JITTERBITS.iter() {
            self.pm.wire.origin = base;
            for i in 0..3 {
                if (bits & (1 << i)) != 0 {
                    self.pm.wire.origin[i] = self.pm.wire.origin[i].wrapping_add(sign[i] as i16);
                }
            }

            if self.good_position() {
                return;
            }
        }

        // every candidate was solid; give up and reuse the last origin
        self.pm.wire.origin = self.pml.previous_origin;
    }

    fn initial_snap_position(&mut self) {
        static OFFSET: [i16; 3] = [0, -1, 1];

        let base = self.pm.wire.origin;

        for z in 0..3 {
            self.pm.wire.origin[2] = base[2].wrapping_add(OFFSET[z]);
            for y in 0..3 {
                self.pm.wire.origin[1] = base[1].wrapping_add(OFFSET[y]);
                for x in 0..3 {
                    self.pm.wire.origin[0] = base[0].wrapping_add(OFFSET[x]);
                    if self.good_position() {
                        self.pml.origin[0] = self.pm.wire.origin[0] as f32 * 0.125;
                        self.pml.origin[1] = self.pm.wire.origin[1] as f32 * 0.125;
                        self.pml.origin[2] = self.pm.wire.origin[2] as f32 * 0.125;
                        self.pml.previous_origin = self.pm.wire.origin;
                        return;
                    }
                }
            }
        }

        log::debug!("no good initial spawn position found");
    }

    // --------------------------------------------------------
    // View angles from the command plus the server-imposed deltas
    // --------------------------------------------------------
    fn clamp_angles(&mut self) {
        if self.pm.wire.flags.contains(MoveFlags::TIME_TELEPORT) {
            // mid-teleport the view is pinned to the destination yaw
            self.pm.view_angles[YAW] = short_to_angle(
                self.pm.cmd.angles[YAW].wrapping_add(self.pm.wire.delta_angles[YAW]),
            );
            self.pm.view_angles[PITCH] = 0.0;
            self.pm.view_angles[2] = 0.0;
        } else {
            for i in 0..3 {
                let temp = self.pm.cmd.angles[i].wrapping_add(self.pm.wire.delta_angles[i]);
                self.pm.view_angles[i] = short_to_angle(temp);
            }

            // never look up or down more than 90 degrees
            if self.pm.view_angles[PITCH] > 89.0 && self.pm.view_angles[PITCH] < 180.0 {
                self.pm.view_angles[PITCH] = 89.0;
            } else if self.pm.view_angles[PITCH] < 271.0 && self.pm.view_angles[PITCH] >= 180.0 {
                self.pm.view_angles[PITCH] = 271.0;
            }
        }
        angle_vectors(
            &self.pm.view_angles,
            Some(&mut self.pml.forward),
            Some(&mut self.pml.right),
            Some(&mut self.pml.up),
        );
    }

    // --------------------------------------------------------
    // The tick pipeline
    // --------------------------------------------------------
    fn execute(&mut self) {
        // clear results
        self.pm.num_touch = 0;
        self.pm.view_angles = [0.0; 3];
        self.pm.view_height = 0.0;
        self.pm.ground_entity = -1;
        self.pm.water_type = 0;
        self.pm.water_level = 0;

        self.pml = MoveLocal::default();

        // dequantize origin and velocity
        for i in 0..3 {
            self.pml.origin[i] = self.pm.wire.origin[i] as f32 * 0.125;
            self.pml.velocity[i] = self.pm.wire.velocity[i] as f32 * 0.125;
        }

        // save old origin in case we get stuck
        self.pml.previous_origin = self.pm.wire.origin;

        self.pml.frametime = self.pm.cmd.msec as f32 * 0.001;

        self.clamp_angles();

        if self.pm.wire.kind == MoveKind::Spectator {
            self.fly_move(false);
            self.snap_position();
            return;
        }

        if matches!(
            self.pm.wire.kind,
            MoveKind::Dead | MoveKind::Gib | MoveKind::Freeze
        ) {
            self.pm.cmd.forward = 0;
            self.pm.cmd.side = 0;
            self.pm.cmd.up = 0;
        }

        if self.pm.wire.kind == MoveKind::Freeze {
            return; // no movement at all
        }

        // set mins, maxs, and view height
        self.check_duck();

        if self.pm.snap_initial {
            self.initial_snap_position();
        }

        // set ground entity, water type, and water level
        self.categorize_position();

        if self.pm.wire.kind == MoveKind::Dead {
            self.dead_move();
        }

        self.check_special_movement();

        // drop timing counter
        if self.pm.wire.time != 0 {
            let mut msec = (self.pm.cmd.msec >> 3) as i32;
            if msec == 0 {
                msec = 1;
            }
            if msec >= self.pm.wire.time as i32 {
                self.pm.wire.flags.remove(
                    MoveFlags::TIME_WATERJUMP | MoveFlags::TIME_LAND | MoveFlags::TIME_TELEPORT,
                );
                self.pm.wire.time = 0;
            } else {
                self.pm.wire.time -= msec as u8;
            }
        }

        if self.pm.wire.flags.contains(MoveFlags::TIME_TELEPORT) {
            // teleport pause stays exactly in place
        } else if self.pm.wire.flags.contains(MoveFlags::TIME_WATERJUMP) {
            // waterjump has no control, but falls
            self.pml.velocity[2] -= self.pm.wire.gravity as f32 * self.pml.frametime;
            if self.pml.velocity[2] < 0.0 {
                // cancel as soon as we are falling down again
                self.pm.wire.flags.remove(
                    MoveFlags::TIME_WATERJUMP | MoveFlags::TIME_LAND | MoveFlags::TIME_TELEPORT,
                );
                self.pm.wire.time = 0;
            }

            self.step_slide_move();
        } else {
            self.check_jump();

            self.friction();

            if self.pm.water_level >= 2 {
                self.water_move();
            } else {
                // walking wish direction uses a third of the view pitch
                let mut angles = self.pm.view_angles;
                if angles[PITCH] > 180.0 {
                    angles[PITCH] -= 360.0;
                }
                angles[PITCH] /= 3.0;

                angle_vectors(
                    &angles,
                    Some(&mut self.pml.forward),
                    Some(&mut self.pml.right),
                    Some(&mut self.pml.up),
                );

                self.air_move();
            }
        }

        // reclassify at the final spot
        self.categorize_position();

        self.snap_position();
    }
}

// ============================================================
// Public API
// ============================================================

/// Advance one movement tick. Both the server and predicting clients call
/// this with identical inputs and must get bit-identical wire state back.
pub fn player_move(pm: &mut PlayerMove, world: &impl MoveContext) {
    let mut tick = Tick {
        pm,
        pml: MoveLocal::default(),
        world,
    };
    tick.execute();
}

// ============================================================
// Tests
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::coord_to_wire;

    /// Open air, no collisions.
    struct OpenAir;

    impl MoveContext for OpenAir {
        fn trace(&self, _start: &Vec3, _mins: &Vec3, _maxs: &Vec3, end: &Vec3) -> TraceResult {
            TraceResult {
                endpos: *end,
                ..Default::default()
            }
        }

        fn point_contents(&self, _point: &Vec3) -> i32 {
            0
        }
    }

    /// A solid floor at z=0, open above.
    struct Floor;

    impl MoveContext for Floor {
        fn trace(&self, start: &Vec3, mins: &Vec3, _maxs: &Vec3, end: &Vec3) -> TraceResult {
            // the box bottom rides at origin_z + mins[2]
            let stand = -mins[2];
            if end[2] < stand {
                let frac = if (start[2] - end[2]).abs() > f32::EPSILON {
                    ((start[2] - stand) / (start[2] - end[2])).clamp(0.0, 1.0)
                } else {
                    1.0
                };
                TraceResult {
                    fraction: frac,
                    endpos: [
                        start[0] + frac * (end[0] - start[0]),
                        start[1] + frac * (end[1] - start[1]),
                        stand,
                    ],
                    plane: Plane {
                        normal: [0.0, 0.0, 1.0],
                        dist: 0.0,
                        kind: 2,
                        signbits: 0,
                    },
                    surface: Some(Surface::default()),
                    contents: CONTENTS_SOLID,
                    ent: 0, // world
                    ..Default::default()
                }
            } else {
                TraceResult {
                    endpos: *end,
                    ..Default::default()
                }
            }
        }

        fn point_contents(&self, point: &Vec3) -> i32 {
            if point[2] < 0.0 {
                CONTENTS_SOLID
            } else {
                0
            }
        }
    }

    /// Submerged everywhere.
    struct Underwater;

    impl MoveContext for Underwater {
        fn trace(&self, _start: &Vec3, _mins: &Vec3, _maxs: &Vec3, end: &Vec3) -> TraceResult {
            TraceResult {
                endpos: *end,
                ..Default::default()
            }
        }

        fn point_contents(&self, _point: &Vec3) -> i32 {
            CONTENTS_WATER
        }
    }

    /// Solid everywhere; every position test fails.
    struct AllSolid;

    impl MoveContext for AllSolid {
        fn trace(&self, start: &Vec3, _mins: &Vec3, _maxs: &Vec3, _end: &Vec3) -> TraceResult {
            TraceResult {
                allsolid: true,
                startsolid: true,
                fraction: 0.0,
                endpos: *start,
                contents: CONTENTS_SOLID,
                ..Default::default()
            }
        }

        fn point_contents(&self, _point: &Vec3) -> i32 {
            CONTENTS_SOLID
        }
    }

    fn standing_on_floor() -> PlayerMove {
        let mut pm = PlayerMove::default();
        pm.wire.kind = MoveKind::Normal;
        pm.wire.gravity = 800;
        pm.wire.origin = [0, 0, coord_to_wire(24.0)];
        pm.wire.flags = MoveFlags::ON_GROUND;
        pm.cmd.msec = 16;
        pm
    }

    #[test]
    fn clip_velocity_removes_normal_component() {
        let inv: Vec3 = [10.0, 0.0, -10.0];
        let normal: Vec3 = [0.0, 0.0, 1.0];
        let mut out: Vec3 = [0.0; 3];
        clip_velocity(&inv, &normal, &mut out, 1.0);
        assert!((out[0] - 10.0).abs() < 1e-6);
        assert!(out[1].abs() < 1e-6);
        assert!(out[2].abs() < 1e-6);
    }

    #[test]
    fn clip_velocity_overbounce() {
        let inv: Vec3 = [0.0, 0.0, -100.0];
        let normal: Vec3 = [0.0, 0.0, 1.0];
        let mut out: Vec3 = [0.0; 3];
        clip_velocity(&inv, &normal, &mut out, 1.01);
        // -100 - (-100 * 1.01) = 1.0
        assert!((out[2] - 1.0).abs() < 0.01);
    }

    #[test]
    fn clip_velocity_snaps_tiny_components_to_zero() {
        let inv: Vec3 = [0.05, 0.0, -10.0];
        let normal: Vec3 = [0.0, 0.0, 1.0];
        let mut out: Vec3 = [0.0; 3];
        clip_velocity(&inv, &normal, &mut out, 1.0);
        assert_eq!(out[0], 0.0);
    }

    #[test]
    fn freeze_does_not_move() {
        let mut pm = PlayerMove::default();
        pm.wire.kind = MoveKind::Freeze;
        pm.wire.origin = [800, 800, 800];
        pm.cmd.msec = 16;
        pm.cmd.forward = 127;

        player_move(&mut pm, &OpenAir);
        assert_eq!(pm.wire.origin, [800, 800, 800]);
    }

    #[test]
    fn gravity_accelerates_fall() {
        let mut pm = PlayerMove::default();
        pm.wire.kind = MoveKind::Normal;
        pm.wire.gravity = 800;
        pm.wire.origin = [0, 0, coord_to_wire(200.0)];
        pm.cmd.msec = 100;

        player_move(&mut pm, &OpenAir);

        // v = -800 * 0.1 = -80; z drops by 8
        assert!(pm.wire.velocity[2] < 0);
        assert!((pm.wire.velocity[2] as f32 * 0.125 - -80.0).abs() < 1.0);
        assert!(pm.wire.origin[2] < coord_to_wire(200.0));
        assert_eq!(pm.ground_entity, -1);
    }

    #[test]
    fn landing_sets_ground_flag() {
        let mut pm = PlayerMove::default();
        pm.wire.kind = MoveKind::Normal;
        pm.wire.gravity = 800;
        pm.wire.origin = [0, 0, coord_to_wire(26.0)];
        pm.wire.velocity = [0, 0, coord_to_wire(-100.0)];
        pm.cmd.msec = 50;

        player_move(&mut pm, &Floor);

        assert!(pm.wire.flags.contains(MoveFlags::ON_GROUND));
        assert_eq!(pm.ground_entity, 0);
        // resting with the feet on the floor
        assert!((pm.wire.origin[2] as f32 * 0.125 - 24.0).abs() < 0.25);
    }

    #[test]
    fn hard_landing_applies_stun_time() {
        // arriving at the floor still carrying -500 vertical: the ground
        // probe sees it before the slide bleeds the speed off
        let mut pm = PlayerMove::default();
        pm.wire.kind = MoveKind::Normal;
        pm.wire.gravity = 800;
        pm.wire.origin = [0, 0, coord_to_wire(24.0)];
        pm.wire.velocity = [0, 0, coord_to_wire(-500.0)];
        pm.cmd.msec = 16;

        player_move(&mut pm, &Floor);

        assert!(pm.wire.flags.contains(MoveFlags::ON_GROUND));
        assert!(pm.wire.flags.contains(MoveFlags::TIME_LAND));
        // stun starts at 25 and this tick already consumed 16ms >> 3
        assert_eq!(pm.wire.time, 23);
    }

    #[test]
    fn jump_launches_at_fixed_impulse() {
        let mut pm = standing_on_floor();
        pm.cmd.up = 127;

        player_move(&mut pm, &Floor);

        assert!(pm.wire.flags.contains(MoveFlags::JUMP_HELD));
        assert!((pm.wire.velocity[2] as f32 * 0.125 - 270.0).abs() < 15.0);
        assert_eq!(pm.ground_entity, -1);
    }

    #[test]
    fn held_jump_does_not_retrigger() {
        let mut pm = standing_on_floor();
        pm.cmd.up = 127;
        pm.wire.flags.insert(MoveFlags::JUMP_HELD);

        player_move(&mut pm, &Floor);

        // still grounded, no second impulse
        assert!(pm.wire.velocity[2] as f32 * 0.125 < 100.0);
        assert!(pm.wire.flags.contains(MoveFlags::ON_GROUND));
    }

    #[test]
    fn releasing_jump_clears_held_flag() {
        let mut pm = standing_on_floor();
        pm.cmd.up = 0;
        pm.wire.flags.insert(MoveFlags::JUMP_HELD);

        player_move(&mut pm, &Floor);
        assert!(!pm.wire.flags.contains(MoveFlags::JUMP_HELD));
    }

    #[test]
    fn duck_shrinks_box_and_drops_view() {
        let mut pm = standing_on_floor();
        pm.cmd.up = -127;

        player_move(&mut pm, &Floor);

        assert!(pm.wire.flags.contains(MoveFlags::DUCKED));
        assert_eq!(pm.maxs[2], 4.0);
        assert_eq!(pm.view_height, -2.0);
    }

    #[test]
    fn stand_up_restores_box() {
        let mut pm = standing_on_floor();
        pm.wire.flags.insert(MoveFlags::DUCKED);
        pm.cmd.up = 0;

        player_move(&mut pm, &Floor);

        assert!(!pm.wire.flags.contains(MoveFlags::DUCKED));
        assert_eq!(pm.maxs[2], 32.0);
        assert_eq!(pm.view_height, 22.0);
    }

    #[test]
    fn dead_ignores_input_and_slides_to_stop() {
        let mut pm = standing_on_floor();
        pm.wire.kind = MoveKind::Dead;
        pm.wire.velocity = [coord_to_wire(15.0), 0, 0];
        pm.cmd.forward = 127;
        pm.cmd.up = 127;

        player_move(&mut pm, &Floor);

        // 15 - 20 of corpse friction bottoms out at zero, and the forward
        // command is discarded
        assert_eq!(pm.wire.velocity[0], 0);
        assert!(pm.wire.flags.contains(MoveFlags::DUCKED));
    }

    #[test]
    fn ground_run_converges_below_max_speed() {
        let mut pm = standing_on_floor();
        pm.air_accelerate = 0.0;

        for _ in 0..400 {
            pm.cmd.forward = 400; // wish speed above the cap
            pm.cmd.msec = 16;
            player_move(&mut pm, &Floor);
        }

        let speed = ((pm.wire.velocity[0] as f32 * 0.125).powi(2)
            + (pm.wire.velocity[1] as f32 * 0.125).powi(2))
        .sqrt();
        assert!(speed <= PM_MAXSPEED + 1.0, "speed={speed}");
        assert!(speed > PM_MAXSPEED * 0.8, "speed={speed}");
    }

    #[test]
    fn friction_stops_a_sliding_player() {
        let mut pm = standing_on_floor();
        pm.wire.velocity = [coord_to_wire(200.0), 0, 0];

        let mut last = 200.0f32;
        for _ in 0..200 {
            pm.cmd.msec = 16;
            player_move(&mut pm, &Floor);
            let speed = pm.wire.velocity[0] as f32 * 0.125;
            assert!(speed <= last + 0.5);
            last = speed;
        }
        assert_eq!(pm.wire.velocity[0], 0);
    }

    #[test]
    fn swim_up_uses_water_impulse() {
        let mut pm = PlayerMove::default();
        pm.wire.kind = MoveKind::Normal;
        pm.wire.gravity = 800;
        pm.wire.origin = [0, 0, 800];
        pm.cmd.msec = 16;
        pm.cmd.up = 127;

        player_move(&mut pm, &Underwater);

        assert_eq!(pm.water_level, 3);
        assert_eq!(pm.water_type, CONTENTS_WATER);
        assert!(pm.wire.velocity[2] > 0);
        // the swim impulse, before this tick's water acceleration
        assert!((pm.wire.velocity[2] as f32 * 0.125) < 160.0);
    }

    #[test]
    fn water_drifts_down_without_input() {
        let mut pm = PlayerMove::default();
        pm.wire.kind = MoveKind::Normal;
        pm.wire.gravity = 800;
        pm.wire.origin = [0, 0, 800];
        pm.cmd.msec = 100;

        player_move(&mut pm, &Underwater);

        assert!(pm.wire.velocity[2] < 0);
    }

    #[test]
    fn spectator_flies_forward() {
        let mut pm = PlayerMove::default();
        pm.wire.kind = MoveKind::Spectator;
        pm.cmd.msec = 16;
        pm.cmd.forward = 127;
        pm.wire.origin = [0, 0, 800];

        player_move(&mut pm, &OpenAir);

        // angles default to zero, so forward is +x
        assert!(pm.wire.velocity[0] > 0);
        assert!(pm.wire.origin[0] > 0);
        assert_eq!(pm.wire.origin[2], 800);
    }

    #[test]
    fn spectator_does_not_clip() {
        let mut pm = PlayerMove::default();
        pm.wire.kind = MoveKind::Spectator;
        pm.cmd.msec = 16;
        pm.cmd.forward = 127;
        pm.wire.origin = [0, 0, 800];

        player_move(&mut pm, &AllSolid);
        assert!(pm.wire.origin[0] > 0);
    }

    #[test]
    fn pitch_is_clamped_to_vertical() {
        let mut pm = standing_on_floor();
        // 120 degrees of downward pitch as a wire angle
        pm.cmd.angles[PITCH] = (120.0f32 * 65536.0 / 360.0) as i32 as i16;

        player_move(&mut pm, &Floor);
        assert_eq!(pm.view_angles[PITCH], 89.0);

        // in-range pitch passes through exactly
        let mut pm = standing_on_floor();
        pm.cmd.angles[PITCH] = (-45.0f32 * 65536.0 / 360.0) as i32 as i16;

        player_move(&mut pm, &Floor);
        assert_eq!(pm.view_angles[PITCH], -45.0);
    }

    #[test]
    fn teleport_pause_freezes_origin_and_pins_view() {
        let mut pm = standing_on_floor();
        pm.wire.flags.insert(MoveFlags::TIME_TELEPORT);
        pm.wire.time = 100;
        pm.wire.velocity = [coord_to_wire(100.0), 0, 0];
        pm.cmd.forward = 127;
        pm.cmd.angles[PITCH] = 4000;

        let origin = pm.wire.origin;
        player_move(&mut pm, &Floor);

        assert_eq!(pm.wire.origin, origin);
        assert_eq!(pm.view_angles[PITCH], 0.0);
        // timer dropped by msec >> 3
        assert_eq!(pm.wire.time, 98);
    }

    #[test]
    fn timer_drops_by_at_least_one_unit() {
        let mut pm = standing_on_floor();
        pm.wire.flags.insert(MoveFlags::TIME_LAND);
        pm.wire.time = 5;
        pm.cmd.msec = 4; // 4 >> 3 == 0, still must tick down

        player_move(&mut pm, &Floor);
        assert_eq!(pm.wire.time, 4);
    }

    #[test]
    fn landing_stun_blocks_jump() {
        let mut pm = standing_on_floor();
        pm.wire.flags.insert(MoveFlags::TIME_LAND);
        pm.wire.time = 18;
        pm.cmd.up = 127;

        player_move(&mut pm, &Floor);

        assert!(pm.wire.flags.contains(MoveFlags::ON_GROUND));
        assert!(pm.wire.velocity[2] as f32 * 0.125 < 100.0);
    }

    #[test]
    fn snap_falls_back_to_previous_origin_when_stuck() {
        let mut pm = PlayerMove::default();
        pm.wire.kind = MoveKind::Normal;
        pm.wire.origin = [801, 401, 201];
        pm.cmd.msec = 16;

        player_move(&mut pm, &AllSolid);

        // every jitter candidate is solid, so the pre-move origin survives
        assert_eq!(pm.wire.origin, [801, 401, 201]);
    }

    #[test]
    fn initial_snap_finds_nearby_open_spot() {
        // solid below z=25: the spawn origin at z=24.875 is inside, one
        // eighth up is clear
        struct HighFloor;
        impl MoveContext for HighFloor {
            fn trace(&self, start: &Vec3, _mins: &Vec3, _maxs: &Vec3, end: &Vec3) -> TraceResult {
                let solid = start[2] < 25.0;
                TraceResult {
                    allsolid: solid,
                    startsolid: solid,
                    fraction: if solid { 0.0 } else { 1.0 },
                    endpos: *end,
                    ..Default::default()
                }
            }
            fn point_contents(&self, point: &Vec3) -> i32 {
                if point[2] < 25.0 {
                    CONTENTS_SOLID
                } else {
                    0
                }
            }
        }

        let mut pm = PlayerMove::default();
        pm.wire.kind = MoveKind::Normal;
        pm.wire.origin = [0, 0, coord_to_wire(24.875)];
        pm.snap_initial = true;
        pm.cmd.msec = 16;

        player_move(&mut pm, &HighFloor);

        assert!(pm.wire.origin[2] as f32 * 0.125 >= 25.0);
    }

    #[test]
    fn identical_inputs_give_identical_wire_state() {
        let script: Vec<MoveCmd> = (0..120)
            .map(|i| MoveCmd {
                msec: 16,
                forward: if i % 7 < 4 { 127 } else { -64 },
                side: if i % 11 < 5 { 90 } else { 0 },
                up: if i % 23 == 0 { 127 } else { 0 },
                angles: [0, (i * 300) as i16, 0],
                buttons: 0,
            })
            .collect();

        let run = || {
            let mut pm = standing_on_floor();
            let mut states = Vec::new();
            for cmd in &script {
                pm.cmd = *cmd;
                player_move(&mut pm, &Floor);
                states.push(pm.wire);
            }
            states
        };

        assert_eq!(run(), run());
    }

    #[test]
    fn air_control_is_capped() {
        // with air_accelerate enabled, airborne input beyond 30 units of
        // along-wish speed adds nothing
        let mut pm = PlayerMove::default();
        pm.wire.kind = MoveKind::Normal;
        pm.wire.gravity = 800;
        pm.wire.origin = [0, 0, coord_to_wire(500.0)];
        pm.wire.velocity = [coord_to_wire(40.0), 0, 0];
        pm.air_accelerate = 10.0;
        pm.cmd.msec = 16;
        pm.cmd.forward = 127;

        player_move(&mut pm, &OpenAir);

        // already above the 30-unit cap along the wish direction
        assert_eq!(pm.wire.velocity[0], coord_to_wire(40.0));
    }

    #[test]
    fn shrunk_box_retry_finds_ground_at_an_edge() {
        // the full box catches a steep face at the ledge lip; the box
        // pulled in one unit lands on the walkable top instead
        struct Ledge {
            walkable_when_shrunk: bool,
        }
        impl MoveContext for Ledge {
            fn trace(&self, start: &Vec3, mins: &Vec3, _maxs: &Vec3, end: &Vec3) -> TraceResult {
                if end[2] >= start[2] {
                    return TraceResult {
                        endpos: *end,
                        ..Default::default()
                    };
                }
                let shrunk = mins[0] > -16.0;
                let normal: Vec3 = if shrunk && self.walkable_when_shrunk {
                    [0.0, 0.0, 1.0]
                } else {
                    [0.8, 0.0, 0.6]
                };
                TraceResult {
                    fraction: 0.5,
                    endpos: [start[0], start[1], start[2] - 0.5 * (start[2] - end[2])],
                    plane: Plane {
                        normal,
                        ..Default::default()
                    },
                    surface: Some(Surface::default()),
                    contents: CONTENTS_SOLID,
                    ent: 0,
                    ..Default::default()
                }
            }
            fn point_contents(&self, _point: &Vec3) -> i32 {
                0
            }
        }

        let mut pm = standing_on_floor();
        player_move(&mut pm, &Ledge { walkable_when_shrunk: true });
        assert!(pm.wire.flags.contains(MoveFlags::ON_GROUND));
        assert_eq!(pm.ground_entity, 0);

        // steep no matter how the box is probed: still airborne
        let mut pm = standing_on_floor();
        pm.wire.flags = MoveFlags::empty();
        player_move(&mut pm, &Ledge { walkable_when_shrunk: false });
        assert!(!pm.wire.flags.contains(MoveFlags::ON_GROUND));
        assert_eq!(pm.ground_entity, -1);
    }

    #[test]
    fn running_climbs_a_step_below_stepsize() {
        use crate::collision::{Brush, BrushSide, CollisionWorld, Leaf, Node, Submodel, TraceScratch};
        use crate::shared::MASK_PLAYERSOLID;
        use std::cell::RefCell;

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

        // floor slab with a 16-unit riser across x >= 64
        let mut w = CollisionWorld::empty();
        w.planes = vec![
            axial(2, false, 0.0),   // 0: floor top
            axial(2, true, 64.0),   // 1: floor bottom
            axial(0, false, 512.0), // 2: +x extent
            axial(0, true, 512.0),  // 3: -x extent
            axial(1, false, 512.0), // 4: +y extent
            axial(1, true, 512.0),  // 5: -y extent
            axial(2, false, 16.0),  // 6: step top
            axial(2, true, 0.0),    // 7: step bottom
            axial(0, true, -64.0),  // 8: step riser face
            axial(2, false, 128.0), // 9: split plane above everything
        ];
        w.num_planes = w.planes.len();

        let side = |plane: usize| BrushSide { plane, surface: Some(0) };
        w.brush_sides = vec![
            side(0), side(1), side(2), side(3), side(4), side(5),
            side(6), side(7), side(2), side(8), side(4), side(5),
        ];
        w.num_brush_sides = w.brush_sides.len();

        w.brushes = vec![
            Brush { contents: CONTENTS_SOLID, num_sides: 6, first_side: 0 },
            Brush { contents: CONTENTS_SOLID, num_sides: 6, first_side: 6 },
        ];
        w.num_brushes = 2;
        w.surfaces = vec![Surface::default()];
        w.leafs = vec![
            Leaf { contents: CONTENTS_SOLID, cluster: -1, area: 0, first_brush: 0, num_brushes: 0 },
            Leaf { contents: 0, cluster: 0, area: 1, first_brush: 0, num_brushes: 0 },
            Leaf { contents: CONTENTS_SOLID, cluster: -1, area: 1, first_brush: 0, num_brushes: 2 },
        ];
        w.num_leafs = 3;
        w.empty_leaf = 1;
        w.leaf_brushes = vec![0, 1];
        w.num_leaf_brushes = 2;
        w.nodes = vec![Node { plane: 9, children: [-2, -3] }];
        w.num_nodes = 1;
        w.submodels = vec![Submodel {
            mins: [-513.0, -513.0, -65.0],
            maxs: [513.0, 513.0, 129.0],
            origin: [0.0; 3],
            headnode: 0,
        }];

        struct StepWorld {
            world: CollisionWorld,
            scratch: RefCell<TraceScratch>,
        }
        impl MoveContext for StepWorld {
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
                    trace.ent = 0;
                }
                trace
            }
            fn point_contents(&self, point: &Vec3) -> i32 {
                self.world.point_contents(point, 0)
            }
        }

        let view = StepWorld { world: w, scratch: RefCell::new(TraceScratch::default()) };

        let mut pm = standing_on_floor();
        for _ in 0..80 {
            pm.cmd.forward = 400;
            pm.cmd.msec = 16;
            player_move(&mut pm, &view);
        }

        // ran up the riser and kept going on the upper level
        assert!(pm.wire.origin[0] as f32 * 0.125 > 64.0);
        assert!((pm.wire.origin[2] as f32 * 0.125 - 40.0).abs() < 0.3);
        assert!(pm.wire.flags.contains(MoveFlags::ON_GROUND));
    }

    #[test]
    fn step_above_limit_blocks_like_a_wall() {
        use crate::collision::{Brush, BrushSide, CollisionWorld, Leaf, Node, Submodel, TraceScratch};
        use crate::shared::MASK_PLAYERSOLID;
        use std::cell::RefCell;

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

        // same layout as the climbable case, but the riser is 40 units
        let mut w = CollisionWorld::empty();
        w.planes = vec![
            axial(2, false, 0.0),
            axial(2, true, 64.0),
            axial(0, false, 512.0),
            axial(0, true, 512.0),
            axial(1, false, 512.0),
            axial(1, true, 512.0),
            axial(2, false, 40.0), // ledge top, above the step limit
            axial(2, true, 0.0),
            axial(0, true, -64.0),
            axial(2, false, 128.0),
        ];
        w.num_planes = w.planes.len();

        let side = |plane: usize| BrushSide { plane, surface: Some(0) };
        w.brush_sides = vec![
            side(0), side(1), side(2), side(3), side(4), side(5),
            side(6), side(7), side(2), side(8), side(4), side(5),
        ];
        w.num_brush_sides = w.brush_sides.len();

        w.brushes = vec![
            Brush { contents: CONTENTS_SOLID, num_sides: 6, first_side: 0 },
            Brush { contents: CONTENTS_SOLID, num_sides: 6, first_side: 6 },
        ];
        w.num_brushes = 2;
        w.surfaces = vec![Surface::default()];
        w.leafs = vec![
            Leaf { contents: CONTENTS_SOLID, cluster: -1, area: 0, first_brush: 0, num_brushes: 0 },
            Leaf { contents: 0, cluster: 0, area: 1, first_brush: 0, num_brushes: 0 },
            Leaf { contents: CONTENTS_SOLID, cluster: -1, area: 1, first_brush: 0, num_brushes: 2 },
        ];
        w.num_leafs = 3;
        w.empty_leaf = 1;
        w.leaf_brushes = vec![0, 1];
        w.num_leaf_brushes = 2;
        w.nodes = vec![Node { plane: 9, children: [-2, -3] }];
        w.num_nodes = 1;
        w.submodels = vec![Submodel {
            mins: [-513.0, -513.0, -65.0],
            maxs: [513.0, 513.0, 129.0],
            origin: [0.0; 3],
            headnode: 0,
        }];

        struct LedgeWorld {
            world: CollisionWorld,
            scratch: RefCell<TraceScratch>,
        }
        impl MoveContext for LedgeWorld {
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
                    trace.ent = 0;
                }
                trace
            }
            fn point_contents(&self, point: &Vec3) -> i32 {
                self.world.point_contents(point, 0)
            }
        }

        let view = LedgeWorld { world: w, scratch: RefCell::new(TraceScratch::default()) };

        let mut pm = standing_on_floor();
        for _ in 0..80 {
            pm.cmd.forward = 400;
            pm.cmd.msec = 16;
            player_move(&mut pm, &view);
        }

        // stopped at the riser face, still on the lower level
        assert!(pm.wire.origin[0] as f32 * 0.125 < 64.0 - 16.0 + 0.5);
        assert!((pm.wire.origin[2] as f32 * 0.125 - 24.0).abs() < 0.3);
        assert!(pm.wire.flags.contains(MoveFlags::ON_GROUND));
    }

    #[test]
    fn movement_constants_are_wire_compatible() {
        assert_eq!(STEPSIZE, 18.0);
        assert_eq!(STOP_EPSILON, 0.1);
        assert_eq!(MIN_STEP_NORMAL, 0.7);
        assert_eq!(PM_STOPSPEED, 100.0);
        assert_eq!(PM_MAXSPEED, 300.0);
        assert_eq!(PM_DUCKSPEED, 100.0);
        assert_eq!(PM_ACCELERATE, 10.0);
        assert_eq!(PM_WATERACCELERATE, 10.0);
        assert_eq!(PM_FRICTION, 6.0);
        assert_eq!(PM_WATERFRICTION, 1.0);
        assert_eq!(PM_WATERSPEED, 400.0);
    }
}
