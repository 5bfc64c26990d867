// bsp.rs — on-disk layout of the precomputed space partition consumed by
// the collision loader. Producing these files is out of scope; this module
// only describes the record shapes and capacities.

pub const BSP_VERSION: i32 = 38;

// hard capacity limits; exceeding any of these is a fatal load error
pub const MAX_MAP_MODELS: usize = 1024;
pub const MAX_MAP_BRUSHES: usize = 8192;
pub const MAX_MAP_ENTSTRING: usize = 0x40000;
pub const MAX_MAP_TEXINFO: usize = 8192;
pub const MAX_MAP_AREAS: usize = 256;
pub const MAX_MAP_AREAPORTALS: usize = 1024;
pub const MAX_MAP_PLANES: usize = 65536;
pub const MAX_MAP_NODES: usize = 65536;
pub const MAX_MAP_BRUSHSIDES: usize = 65536;
pub const MAX_MAP_LEAFS: usize = 65536;
pub const MAX_MAP_LEAFBRUSHES: usize = 65536;
pub const MAX_MAP_VISIBILITY: usize = 0x100000;

// lump directory indices
pub const LUMP_ENTITIES: usize = 0;
pub const LUMP_PLANES: usize = 1;
pub const LUMP_VISIBILITY: usize = 3;
pub const LUMP_NODES: usize = 4;
pub const LUMP_TEXINFO: usize = 5;
pub const LUMP_LEAFS: usize = 8;
pub const LUMP_LEAFBRUSHES: usize = 10;
pub const LUMP_MODELS: usize = 13;
pub const LUMP_BRUSHES: usize = 14;
pub const LUMP_BRUSHSIDES: usize = 15;
pub const LUMP_AREAS: usize = 17;
pub const LUMP_AREAPORTALS: usize = 18;
pub const HEADER_LUMPS: usize = 19;

// fixed record strides, in bytes
pub const PLANE_SIZE: usize = 20;
pub const NODE_SIZE: usize = 28;
pub const TEXINFO_SIZE: usize = 76;
pub const LEAF_SIZE: usize = 28;
pub const LEAFBRUSH_SIZE: usize = 2;
pub const MODEL_SIZE: usize = 48;
pub const BRUSH_SIZE: usize = 12;
pub const BRUSHSIDE_SIZE: usize = 4;
pub const AREA_SIZE: usize = 8;
pub const AREAPORTAL_SIZE: usize = 8;

/// Visibility bit-offset table columns.
pub const VIS_PVS: usize = 0;
pub const VIS_PHS: usize = 1;

#[derive(Debug, Clone, Copy, Default)]
pub struct Lump {
    pub offset: usize,
    pub length: usize,
}

/// Area-portal record, used verbatim at runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct AreaPortalRecord {
    pub portal: i32,
    pub other_area: i32,
}

// little-endian field readers for fixed-size records

#[inline]
pub fn read_i32(data: &[u8], offset: usize) -> i32 {
    i32::from_le_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

#[inline]
pub fn read_u16(data: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([data[offset], data[offset + 1]])
}

#[inline]
pub fn read_i16(data: &[u8], offset: usize) -> i16 {
    i16::from_le_bytes([data[offset], data[offset + 1]])
}

#[inline]
pub fn read_f32(data: &[u8], offset: usize) -> f32 {
    f32::from_le_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}
