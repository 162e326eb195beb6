//! Store primitives organized by table.
//!
//! Every function takes a `&Connection`; inside a unit of work pass the
//! `Transaction`, which derefs to one.

pub mod owners;
pub mod resources;
pub mod shares;
pub mod tribes;
pub mod users;
