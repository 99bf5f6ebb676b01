//! Driver and stub game behind the `kart-remote` and `kart-stub-game`
//! binaries

pub mod driver;
pub mod stub;
