//! Pipeline stages for signature-page augmentation and rasterisation.
//!
//! Each submodule implements exactly one step. Keeping stages separate makes
//! each independently testable and lets us swap implementations (a fake
//! rasteriser, an in-memory object store) without touching the others.
//!
//! ## Data Flow
//!
//! ```text
//! anchor ──▶ layout ──▶ augment ──▶ render ──▶ collect ──▶ upload
//! (markers)  (content)  (lopdf)    (pdftoppm)  (verify)   (paced)
//!                                     ▲
//!                                 workspace
//! ```
//!
//! 1. [`anchor`]    — process-unique signature anchor, fixed date anchor
//! 2. [`layout`]    — content stream of one signature page
//! 3. [`augment`]   — insert/append rendered pages into the source PDF; CPU-bound,
//!    the orchestrator runs it in `spawn_blocking`
//! 4. [`workspace`] — per-job scratch directory and source-file custody
//! 5. [`render`]    — `pdftoppm` subprocess behind the [`render::Rasterizer`] trait
//! 6. [`collect`]   — ordered, gap-free page image set with visibility retries
//! 7. [`upload`]    — sequential uploads with fixed pacing

pub mod anchor;
pub mod augment;
pub mod collect;
pub mod layout;
pub mod render;
pub mod upload;
pub mod workspace;
