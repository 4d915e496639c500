//! Binary parsers for the 3.3.5a client data formats.
//!
//! Everything here is pure: bytes in, structured data out, no I/O.
//! All parsers are bounds-checked and return
//! [`crate::error::ParseError`] rather than panicking on malformed
//! input.

pub mod adt;
pub mod blp;
pub mod cursor;
pub mod dbc;
pub mod m2;
pub mod wmo;

pub use adt::{parse_tile, TerrainTile};
pub use blp::{parse_image, BlpImage, ImagePixels};
pub use dbc::{parse_table, Table};
pub use m2::{attach_anim, attach_skin, parse_model, M2Model};
pub use wmo::{parse_group, parse_root, WmoGroup, WmoRoot};
