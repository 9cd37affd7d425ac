// ── Atoms: leaf types shared by every engine module ────────────────────────
// No engine module may be imported from here; atoms depend only on crates.

pub mod constants;
pub mod error;
pub mod types;
