//! Filterable storage: how one dispatch binds its source and destination
//! and over which work shape it runs.
//!
//! The three layouts share every kernel name and argument order; only
//! the handle arguments and the work shape differ:
//!
//! | Surface        | source args        | shape                  |
//! |----------------|--------------------|------------------------|
//! | `ImageSurface` | `image2d_t`        | `(w, h)`               |
//! | `CubeSurface`  | `image2d_array_t`  | `(w, h, 4)`            |
//! | `FlatSurface`  | `float*`, `Lookup*`| `(w, h, 4)` at `4·o`   |

use std::collections::HashMap;

use opencl3::memory::{Buffer, Image};
use opencl3::types::cl_mem;

use super::{mem_of, ClBackend, KernelArg, WorkShape};
use crate::contract;
use crate::pyramid::{octave_base, LookupEntry, LEVELS_PER_OCTAVE};
use crate::PyrResult;

/// Device representation behind a surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageKind {
    Image2d,
    ImageArray,
    Flat,
}

/// Identifies a reusable temporary of a given storage kind and size.
/// `slot` distinguishes temporaries needed at the same time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScratchKey {
    pub kind: StorageKind,
    pub width: usize,
    pub height: usize,
    pub depth: usize,
    pub slot: u8,
}

/// Something a filter kernel can read from or write to.
pub trait Surface {
    fn kind(&self) -> StorageKind;

    /// Raw handle of the image or buffer.
    fn mem(&self) -> cl_mem;

    /// Level addressing table, flat buffers only.
    fn lookup(&self) -> Option<cl_mem> {
        None
    }

    /// Global shape (and offset) of a dispatch over this surface.
    fn work_shape(&self) -> WorkShape;

    /// Temporary with the same kind and extent as this surface.
    fn scratch_key(&self, slot: u8) -> ScratchKey;

    /// Leading handle arguments when this surface is the filter input.
    fn source_args(&self) -> Vec<KernelArg> {
        let mut args = vec![KernelArg::Mem(self.mem())];
        if let Some(lookup) = self.lookup() {
            args.push(KernelArg::Mem(lookup));
        }
        args
    }

    /// Handle argument when this surface is a filter output.
    fn destination_arg(&self) -> KernelArg {
        KernelArg::Mem(self.mem())
    }

    fn width(&self) -> usize {
        self.work_shape().cols()
    }

    fn height(&self) -> usize {
        self.work_shape().rows()
    }
}

/// One pyramid level stored as a 2D image.
pub struct ImageSurface<'a> {
    image: &'a Image,
    width: usize,
    height: usize,
}

impl<'a> ImageSurface<'a> {
    pub fn new(image: &'a Image, width: usize, height: usize) -> PyrResult<Self> {
        contract!(
            width > 0 && height > 0,
            "image surface must be non-empty, got {width}x{height}"
        );
        Ok(Self {
            image,
            width,
            height,
        })
    }
}

impl Surface for ImageSurface<'_> {
    fn kind(&self) -> StorageKind {
        StorageKind::Image2d
    }

    fn mem(&self) -> cl_mem {
        mem_of(self.image)
    }

    fn work_shape(&self) -> WorkShape {
        WorkShape::d2(self.width, self.height)
    }

    fn scratch_key(&self, slot: u8) -> ScratchKey {
        ScratchKey {
            kind: StorageKind::Image2d,
            width: self.width,
            height: self.height,
            depth: 1,
            slot,
        }
    }
}

/// One octave stored as a 2D image array, one slice per level.
pub struct CubeSurface<'a> {
    cube: &'a Image,
    width: usize,
    height: usize,
}

impl<'a> CubeSurface<'a> {
    pub fn new(cube: &'a Image, width: usize, height: usize) -> PyrResult<Self> {
        contract!(
            width > 0 && height > 0,
            "cube surface must be non-empty, got {width}x{height}"
        );
        Ok(Self {
            cube,
            width,
            height,
        })
    }
}

impl Surface for CubeSurface<'_> {
    fn kind(&self) -> StorageKind {
        StorageKind::ImageArray
    }

    fn mem(&self) -> cl_mem {
        mem_of(self.cube)
    }

    fn work_shape(&self) -> WorkShape {
        WorkShape::d3(self.width, self.height, LEVELS_PER_OCTAVE, 0)
    }

    fn scratch_key(&self, slot: u8) -> ScratchKey {
        ScratchKey {
            kind: StorageKind::ImageArray,
            width: self.width,
            height: self.height,
            depth: LEVELS_PER_OCTAVE,
            slot,
        }
    }
}

/// One octave of a flat pyramid buffer. Every flat surface of a pyramid
/// shares the buffer size and the lookup table; the octave only moves
/// the z offset of the dispatch.
pub struct FlatSurface<'a> {
    buffer: &'a Buffer<f32>,
    lookup: &'a Buffer<LookupEntry>,
    width: usize,
    height: usize,
    octave: usize,
    total_pixels: usize,
}

impl<'a> FlatSurface<'a> {
    pub fn new(
        buffer: &'a Buffer<f32>,
        lookup: &'a Buffer<LookupEntry>,
        (width, height): (usize, usize),
        octave: usize,
        total_pixels: usize,
    ) -> PyrResult<Self> {
        contract!(
            width > 0 && height > 0,
            "flat surface must be non-empty, got {width}x{height}"
        );
        Ok(Self {
            buffer,
            lookup,
            width,
            height,
            octave,
            total_pixels,
        })
    }
}

impl Surface for FlatSurface<'_> {
    fn kind(&self) -> StorageKind {
        StorageKind::Flat
    }

    fn mem(&self) -> cl_mem {
        mem_of(self.buffer)
    }

    fn lookup(&self) -> Option<cl_mem> {
        Some(mem_of(self.lookup))
    }

    fn work_shape(&self) -> WorkShape {
        WorkShape::d3(
            self.width,
            self.height,
            LEVELS_PER_OCTAVE,
            octave_base(self.octave),
        )
    }

    fn scratch_key(&self, slot: u8) -> ScratchKey {
        ScratchKey {
            kind: StorageKind::Flat,
            width: self.total_pixels,
            height: 1,
            depth: 1,
            slot,
        }
    }
}

/// Pool memory standing in for a surface of the same kind and shape.
pub(crate) struct ScratchSurface {
    kind: StorageKind,
    mem: cl_mem,
    lookup: Option<cl_mem>,
    shape: WorkShape,
    key: ScratchKey,
}

impl ScratchSurface {
    pub(crate) fn like(template: &dyn Surface, mem: cl_mem, slot: u8) -> Self {
        Self {
            kind: template.kind(),
            mem,
            lookup: template.lookup(),
            shape: template.work_shape(),
            key: template.scratch_key(slot),
        }
    }
}

impl Surface for ScratchSurface {
    fn kind(&self) -> StorageKind {
        self.kind
    }

    fn mem(&self) -> cl_mem {
        self.mem
    }

    fn lookup(&self) -> Option<cl_mem> {
        self.lookup
    }

    fn work_shape(&self) -> WorkShape {
        self.shape
    }

    fn scratch_key(&self, slot: u8) -> ScratchKey {
        ScratchKey { slot, ..self.key }
    }
}

enum ScratchMem {
    Image(Image),
    Buffer(Buffer<f32>),
}

impl ScratchMem {
    fn mem(&self) -> cl_mem {
        match self {
            ScratchMem::Image(img) => mem_of(img),
            ScratchMem::Buffer(buf) => mem_of(buf),
        }
    }
}

/// Temporaries for separable passes, allocated on first use and kept
/// for the lifetime of the owning engine.
#[derive(Default)]
pub struct ScratchPool {
    entries: HashMap<ScratchKey, ScratchMem>,
}

impl std::fmt::Debug for ScratchPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScratchPool")
            .field("entries", &self.entries.len())
            .finish()
    }
}

impl ScratchPool {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Handle of the temporary for `key`, allocating it if needed.
    pub(crate) fn acquire(&mut self, backend: &ClBackend, key: ScratchKey) -> PyrResult<cl_mem> {
        if let Some(existing) = self.entries.get(&key) {
            return Ok(existing.mem());
        }
        log::debug!("allocating scratch {key:?}");
        let mem = match key.kind {
            StorageKind::Image2d => ScratchMem::Image(backend.alloc_image2d(key.width, key.height)?),
            StorageKind::ImageArray => ScratchMem::Image(backend.alloc_image_array(
                key.width,
                key.height,
                key.depth,
            )?),
            StorageKind::Flat => ScratchMem::Buffer(backend.alloc_buffer::<f32>(key.width)?),
        };
        let handle = mem.mem();
        self.entries.insert(key, mem);
        Ok(handle)
    }
}
