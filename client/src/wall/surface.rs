//! Render surface capability and a retained element backend

use std::collections::HashMap;

use super::cache::ResourceRef;
use super::geometry::TileCoord;

/// Opaque id of a materialized tile on a surface
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct SurfaceHandle(pub u64);

/// Something that can show tiles: a redraw-every-frame canvas or a set of
/// positioned elements. Must tolerate `update`/`destroy` of unknown handles.
pub trait TileSurface {
    /// Create the drawable for a tile, showing a placeholder
    fn materialize(&mut self, coord: TileCoord) -> SurfaceHandle;
    /// Replace the tile's pixels
    fn update(&mut self, handle: SurfaceHandle, image: &ResourceRef);
    /// Drop the drawable and everything it holds
    fn destroy(&mut self, handle: SurfaceHandle);
}

/// One positioned element of a `SceneSurface`
#[derive(Debug, Clone)]
pub struct SceneElement {
    pub coord: TileCoord,
    pub image: Option<ResourceRef>,
    /// Bumped on every `update`
    pub revision: u32,
}

/// Retained element backend: one element per materialized tile, kept in sync
/// with the visible set. Placement comes from the engine's draw list.
#[derive(Default)]
pub struct SceneSurface {
    next_handle: u64,
    elements: HashMap<SurfaceHandle, SceneElement>,
}

impl SceneSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn element(&self, handle: SurfaceHandle) -> Option<&SceneElement> {
        self.elements.get(&handle)
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Coordinates of all live elements
    pub fn coords(&self) -> impl Iterator<Item = TileCoord> + '_ {
        self.elements.values().map(|e| e.coord)
    }
}

impl TileSurface for SceneSurface {
    fn materialize(&mut self, coord: TileCoord) -> SurfaceHandle {
        self.next_handle += 1;
        let handle = SurfaceHandle(self.next_handle);
        self.elements.insert(
            handle,
            SceneElement {
                coord,
                image: None,
                revision: 0,
            },
        );
        handle
    }

    fn update(&mut self, handle: SurfaceHandle, image: &ResourceRef) {
        if let Some(element) = self.elements.get_mut(&handle) {
            element.image = Some(image.clone());
            element.revision += 1;
        }
    }

    fn destroy(&mut self, handle: SurfaceHandle) {
        self.elements.remove(&handle);
    }
}
