pub mod domains;
pub mod locations;
pub mod ranges;

pub use domains::{builtin_domains, load_domains};
pub use locations::RegionMap;
pub use ranges::CidrSet;
