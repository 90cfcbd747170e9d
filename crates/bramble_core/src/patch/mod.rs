//! Patch computation, encoding, application, and rendering.
//!
//! The codec is pure: [`Patch::diff`] and [`Patch::apply`] have no side
//! effects and exact-offset semantics, so a patch replayed against its
//! recorded predecessor text reproduces the successor exactly. The
//! serialized form produced by [`Patch::to_text`] is the crate's one
//! stable wire format.

mod codec;
mod diff;
mod render;

pub use codec::{Hunk, Patch};
pub use diff::{Edit, EditKind, diff};
pub use render::render_markup;
