pub mod capture;
pub mod detection;
pub mod enrollment;
pub mod profile;
pub mod shared;
