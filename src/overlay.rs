//! Floating overlay position
//!
//! The call overlay floats over the host page and can be dragged anywhere
//! within the viewport. Positions are clamped so the overlay can never be
//! dropped off-screen, and the last position is persisted so it survives
//! reloads.

use anyhow::Result;
use jiff::Zoned;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Gap kept between the overlay's default position and the viewport edge.
const DEFAULT_MARGIN: f32 = 24.0;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewportBounds {
    pub width: f32,
    pub height: f32,
}

#[derive(Serialize, Deserialize, Debug)]
struct SavedPosition {
    x: f32,
    y: f32,
    saved_at: String,
}

fn default_store_path() -> Result<PathBuf> {
    let dir = directories::BaseDirs::new()
        .ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?
        .data_local_dir()
        .join("nv-widget");
    std::fs::create_dir_all(&dir)?;
    Ok(dir.join("overlay_position.json"))
}

pub struct DraggableOverlay {
    position: Position,
    width: f32,
    height: f32,
    bounds: ViewportBounds,
    store: Option<PathBuf>,
}

impl DraggableOverlay {
    /// Overlay of the given size inside the given viewport, restored from
    /// the persisted position when one exists.
    pub fn new(bounds: ViewportBounds, width: f32, height: f32) -> Self {
        let store = default_store_path()
            .map_err(|e| tracing::debug!(error = %e, "overlay position store unavailable"))
            .ok();
        Self::with_store(bounds, width, height, store)
    }

    /// Overlay backed by an explicit store path (or none).
    pub fn with_store(
        bounds: ViewportBounds,
        width: f32,
        height: f32,
        store: Option<PathBuf>,
    ) -> Self {
        let mut overlay = Self {
            position: Position {
                x: bounds.width - width - DEFAULT_MARGIN,
                y: bounds.height - height - DEFAULT_MARGIN,
            },
            width,
            height,
            bounds,
            store,
        };
        if let Some(saved) = overlay.load_saved() {
            overlay.position = overlay.clamp(saved);
        } else {
            overlay.position = overlay.clamp(overlay.position);
        }
        overlay
    }

    pub fn position(&self) -> Position {
        self.position
    }

    fn clamp(&self, p: Position) -> Position {
        Position {
            x: p.x.clamp(0.0, (self.bounds.width - self.width).max(0.0)),
            y: p.y.clamp(0.0, (self.bounds.height - self.height).max(0.0)),
        }
    }

    /// Move the overlay, keeping it fully inside the viewport.
    pub fn drag_to(&mut self, x: f32, y: f32) -> Position {
        self.position = self.clamp(Position { x, y });
        self.position
    }

    /// Re-clamp after the viewport changes size.
    pub fn set_bounds(&mut self, bounds: ViewportBounds) {
        self.bounds = bounds;
        self.position = self.clamp(self.position);
    }

    /// Persist the current position for the next page load.
    pub fn persist(&self) -> Result<()> {
        let Some(path) = &self.store else {
            return Ok(());
        };
        let saved = SavedPosition {
            x: self.position.x,
            y: self.position.y,
            saved_at: Zoned::now().to_string(),
        };
        std::fs::write(path, serde_json::to_string_pretty(&saved)?)?;
        Ok(())
    }

    fn load_saved(&self) -> Option<Position> {
        let path = self.store.as_ref()?;
        let contents = std::fs::read_to_string(path).ok()?;
        let saved: SavedPosition = serde_json::from_str(&contents)
            .map_err(|e| tracing::debug!(error = %e, "discarding unreadable overlay position"))
            .ok()?;
        Some(Position {
            x: saved.x,
            y: saved.y,
        })
    }
}
