//! Persisted lightmap cache: a versioned binary blob keyed by the level
//! checksum. Any validation failure loads nothing; the caller falls back to
//! a full relight sweep.

use std::io::{Read, Write};

use serde::{Deserialize, Serialize};
use umbra_level::{Level, RelightState, Surface};

const MAGIC: [u8; 4] = *b"ULMC";
const VERSION: u32 = 1;

#[derive(Debug)]
pub enum CacheError {
    Io(std::io::Error),
    BadMagic,
    BadVersion(u32),
    WrongLevel,
    Corrupt,
    /// Surface layout no longer matches the blob.
    Shape,
}

impl core::fmt::Display for CacheError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            CacheError::Io(e) => write!(f, "lightmap cache i/o: {e}"),
            CacheError::BadMagic => write!(f, "not a lightmap cache blob"),
            CacheError::BadVersion(v) => write!(f, "unsupported lightmap cache version {v}"),
            CacheError::WrongLevel => write!(f, "lightmap cache is for a different level"),
            CacheError::Corrupt => write!(f, "lightmap cache failed validation"),
            CacheError::Shape => write!(f, "lightmap cache does not match surface layout"),
        }
    }
}

impl std::error::Error for CacheError {}

impl From<std::io::Error> for CacheError {
    fn from(e: std::io::Error) -> CacheError {
        CacheError::Io(e)
    }
}

#[derive(Serialize, Deserialize)]
struct SurfEntry {
    texture_mins: [i32; 2],
    extents: [i32; 2],
    mono: Option<Vec<u8>>,
    /// r,g,b triples, flattened.
    rgb: Option<Vec<u8>>,
}

/// Stable checksum over the level geometry, used to key the cache blob.
pub fn level_checksum(level: &Level) -> u32 {
    let mut h = crc32fast::Hasher::new();
    let f = |h: &mut crc32fast::Hasher, v: f32| h.update(&v.to_le_bytes());
    for sec in &level.sectors {
        for p in [sec.floor, sec.ceiling] {
            f(&mut h, p.normal.x);
            f(&mut h, p.normal.y);
            f(&mut h, p.normal.z);
            f(&mut h, p.dist);
        }
    }
    for seg in &level.segs {
        f(&mut h, seg.v1.x);
        f(&mut h, seg.v1.y);
        f(&mut h, seg.v2.x);
        f(&mut h, seg.v2.y);
        h.update(&(seg.front_subsector as u32).to_le_bytes());
    }
    for sub in &level.subsectors {
        h.update(&(sub.sector as u32).to_le_bytes());
        h.update(&(sub.seg_count as u32).to_le_bytes());
    }
    h.finalize()
}

/// Write every surface's static lightmap buffers.
pub fn save_lightmaps<W: Write>(
    mut w: W,
    level_key: u32,
    surfaces: &[Surface],
) -> Result<(), CacheError> {
    let entries: Vec<SurfEntry> = surfaces
        .iter()
        .map(|s| SurfEntry {
            texture_mins: s.texture_mins,
            extents: s.extents,
            mono: s.lightmap.clone(),
            rgb: s.lightmap_rgb.as_ref().map(|rgb| {
                let mut flat = Vec::with_capacity(rgb.len() * 3);
                for c in rgb {
                    flat.extend_from_slice(&[c.r, c.g, c.b]);
                }
                flat
            }),
        })
        .collect();
    let body = bincode::serialize(&entries).map_err(|_| CacheError::Corrupt)?;

    w.write_all(&MAGIC)?;
    w.write_all(&VERSION.to_le_bytes())?;
    w.write_all(&level_key.to_le_bytes())?;
    w.write_all(&(body.len() as u64).to_le_bytes())?;
    w.write_all(&crc32fast::hash(&body).to_le_bytes())?;
    w.write_all(&body)?;
    Ok(())
}

fn read_u32<R: Read>(r: &mut R) -> Result<u32, CacheError> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

/// Load cached lightmaps into `surfaces`, marking restored surfaces clean.
/// Returns the number of restored surfaces. On any error the surfaces are
/// left untouched and the caller keeps its `NeedsRecalc` sweep.
pub fn load_lightmaps<R: Read>(
    mut r: R,
    level_key: u32,
    surfaces: &mut [Surface],
) -> Result<usize, CacheError> {
    let mut magic = [0u8; 4];
    r.read_exact(&mut magic)?;
    if magic != MAGIC {
        return Err(CacheError::BadMagic);
    }
    let version = read_u32(&mut r)?;
    if version != VERSION {
        return Err(CacheError::BadVersion(version));
    }
    if read_u32(&mut r)? != level_key {
        return Err(CacheError::WrongLevel);
    }
    let mut len8 = [0u8; 8];
    r.read_exact(&mut len8)?;
    let body_len = u64::from_le_bytes(len8) as usize;
    let crc = read_u32(&mut r)?;

    let mut body = vec![0u8; body_len];
    r.read_exact(&mut body)?;
    if crc32fast::hash(&body) != crc {
        return Err(CacheError::Corrupt);
    }
    let entries: Vec<SurfEntry> = bincode::deserialize(&body).map_err(|_| CacheError::Corrupt)?;
    if entries.len() != surfaces.len() {
        return Err(CacheError::Shape);
    }
    // validate everything before touching any surface
    for (entry, surf) in entries.iter().zip(surfaces.iter()) {
        if entry.texture_mins != surf.texture_mins || entry.extents != surf.extents {
            return Err(CacheError::Shape);
        }
        let (w, h) = surf.lightmap_size();
        if let Some(mono) = &entry.mono {
            if mono.len() != w * h {
                return Err(CacheError::Corrupt);
            }
        }
        if let Some(rgb) = &entry.rgb {
            if rgb.len() != w * h * 3 || entry.mono.is_none() {
                return Err(CacheError::Corrupt);
            }
        }
    }

    let mut restored = 0usize;
    for (entry, surf) in entries.into_iter().zip(surfaces.iter_mut()) {
        surf.lightmap = entry.mono;
        surf.lightmap_rgb = entry.rgb.map(|flat| {
            flat.chunks_exact(3)
                .map(|c| umbra_geom::Rgb::new(c[0], c[1], c[2]))
                .collect()
        });
        surf.state = RelightState::Clean;
        restored += 1;
    }
    log::info!("restored {restored} cached lightmaps");
    Ok(restored)
}
