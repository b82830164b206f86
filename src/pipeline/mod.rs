//! Pipeline stages for turning an edition's PDF into stored page images.
//!
//! Each submodule implements exactly one step and none of them touch the
//! database; persistence lives in [`crate::db`].
//!
//! ## Data Flow
//!
//! ```text
//! source ──▶ tiers ──▶ rasterize ──▶ (files) ──▶ normalize ──▶ db
//! (locate)   (ladder)  (gs per tier)             (canonical)
//! ```
//!
//! 1. [`source`] resolves the stored document location against the web
//!    root and derives the `pages` output directory.
//! 2. [`tiers`] walks the quality ladder with a timeout and a private
//!    work directory per tier.
//! 3. [`rasterize`] holds the `Rasterizer` seam and its Ghostscript backend.
//! 4. [`normalize`] defines the canonical `uploads/...` path form.

pub mod normalize;
pub mod rasterize;
pub mod source;
pub mod tiers;
